//! Anonymise a user's entries in the audit log.

use std::sync::Arc;

use crate::audit::AuditLogManager;
use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{Job, Parameters};
use crate::params::{JobParams, ParamReader, ValidationError};

/// Job type name.
pub const NAME: &str = "AUDIT_LOGS_GDPR_COMPLIANT";

/// Parameter naming the user to anonymise.
pub const USERNAME: &str = "username";

/// Parameters of [AuditLogsCleanup].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdprParams {
    /// User whose name is replaced.
    pub username: String,
}

impl JobParams for GdprParams {
    fn from_params(params: Option<&Parameters>) -> Result<Self, ValidationError> {
        let mut reader = ParamReader::new(params)?;
        let username = reader.string(USERNAME);
        if username.as_deref().is_some_and(str::is_empty) {
            reader.invalid(USERNAME, "must not be empty");
        }
        reader.finish(|| Some(GdprParams { username: username? }))
    }
}

/// Replaces a user's name in the audit log with an anonymous stand-in.
#[derive(Debug, Clone)]
pub struct AuditLogsCleanup {
    manager: Arc<dyn AuditLogManager>,
}

impl AuditLogsCleanup {
    /// A job which cleans up through `manager`.
    pub fn new(manager: Arc<dyn AuditLogManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Job for AuditLogsCleanup {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_fails(&self) -> u32 {
        3
    }

    fn max_concurrency(&self) -> u32 {
        1
    }

    fn should_retry(&self) -> bool {
        true
    }

    fn validate(&self, params: Option<&Parameters>) -> Result<(), ValidationError> {
        GdprParams::from_params(params).map(|_| ())
    }

    async fn run(&self, ctx: &JobContext, params: Option<&Parameters>) -> Result<(), JobError> {
        let params = GdprParams::from_params(params)?;
        tracing::info!(parent: ctx.logger(), "making audit logs gdpr compliant");

        let changed = self
            .manager
            .make_gdpr_compliant(ctx.system_context(), &params.username)
            .await?;

        tracing::info!(parent: ctx.logger(), entries = changed, "audit logs anonymised");
        Ok(())
    }
}
