//! Audit log storage, as far as jobs need it.

use std::fmt;

use sha2::{Digest as _, Sha256};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditLogEntry {
    /// Position in the log, starting at one.
    pub id: u64,
    /// User who performed the operation.
    pub operator: String,
    /// Operation name, such as `create` or `delete`.
    pub operation: String,
    /// Resource the operation acted on.
    pub resource: String,
    /// Type of [AuditLogEntry::resource].
    pub resource_type: String,
}

/// Errors from audit log maintenance.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The cancellation token fired before the update finished.
    #[error("audit log update cancelled")]
    Cancelled,

    /// The username to anonymize was empty.
    #[error("username must not be empty")]
    EmptyUsername,

    /// The underlying store failed.
    #[error("audit log store: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AuditError {
    /// Whether retrying the update could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuditError::Store(_))
    }
}

/// Maintenance operations on the audit log.
#[async_trait::async_trait]
pub trait AuditLogManager: fmt::Debug + Send + Sync {
    /// Replace every reference to `username` with an anonymous stand-in,
    /// returning how many entries changed.
    async fn make_gdpr_compliant(
        &self,
        cancel: &CancellationToken,
        username: &str,
    ) -> Result<u64, AuditError>;
}

/// An audit log held in memory.
#[derive(Debug)]
pub struct MemoryAuditLog {
    salt: String,
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

impl MemoryAuditLog {
    /// An empty log which anonymizes with `salt`.
    pub fn new<S: Into<String>>(salt: S) -> Self {
        Self {
            salt: salt.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append an entry, assigning its id.
    pub async fn record(&self, operator: &str, operation: &str, resource: &str, resource_type: &str) -> u64 {
        let mut entries = self.entries.write().await;
        let id = entries.len() as u64 + 1;
        entries.push(AuditLogEntry {
            id,
            operator: operator.to_owned(),
            operation: operation.to_owned(),
            resource: resource.to_owned(),
            resource_type: resource_type.to_owned(),
        });
        id
    }

    /// A snapshot of every entry.
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }

    /// The stand-in recorded in place of `username`.
    pub fn anonymize(&self, username: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(username.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait::async_trait]
impl AuditLogManager for MemoryAuditLog {
    async fn make_gdpr_compliant(
        &self,
        cancel: &CancellationToken,
        username: &str,
    ) -> Result<u64, AuditError> {
        if username.is_empty() {
            return Err(AuditError::EmptyUsername);
        }

        let replacement = self.anonymize(username);
        let mut entries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AuditError::Cancelled),
            entries = self.entries.write() => entries,
        };

        let mut changed = 0;
        for entry in entries.iter_mut().filter(|entry| entry.operator == username) {
            entry.operator.clone_from(&replacement);
            changed += 1;
        }
        Ok(changed)
    }
}
