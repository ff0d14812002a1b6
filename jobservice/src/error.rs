//! Errors raised by jobs.

use replication::{AdapterError, AdapterErrorKind, FactoryError};

use crate::audit::AuditError;
use crate::params::ValidationError;

/// Why a job attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Parameters failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A registry adapter failed.
    #[error(transparent)]
    Adapter(AdapterError),

    /// No adapter could be built for a resource.
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// Audit log maintenance failed.
    #[error(transparent)]
    Audit(AuditError),

    /// The job's context was cancelled.
    #[error("job cancelled")]
    Cancelled,

    /// Any other failure. Treated as retryable.
    #[error("{0}")]
    Other(String),
}

impl JobError {
    /// Whether another attempt could succeed where this one failed.
    ///
    /// Validation problems and cancellation are final. Adapter errors defer
    /// to their kind.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Validation(_) | JobError::Factory(_) | JobError::Cancelled => false,
            JobError::Adapter(error) => error.is_retryable(),
            JobError::Audit(error) => error.is_retryable(),
            JobError::Other(_) => true,
        }
    }
}

impl From<AdapterError> for JobError {
    fn from(error: AdapterError) -> Self {
        match error.kind() {
            AdapterErrorKind::Cancelled => JobError::Cancelled,
            _ => JobError::Adapter(error),
        }
    }
}

impl From<AuditError> for JobError {
    fn from(error: AuditError) -> Self {
        match error {
            AuditError::Cancelled => JobError::Cancelled,
            error => JobError::Audit(error),
        }
    }
}
