//! The job contract shared by every job type.

use std::collections::HashMap;
use std::fmt;

use crate::context::JobContext;
use crate::error::JobError;
use crate::params::ValidationError;

/// Untyped job parameters, as delivered by the scheduler.
pub type Parameters = HashMap<String, serde_json::Value>;

/// Lifecycle of one job invocation.
///
/// Retrying is owned by whoever drives the job, so there is no retrying
/// state: a failed attempt that will be retried goes back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, parameters not yet checked.
    Constructed,
    /// Parameters accepted.
    Validated,
    /// An attempt is in progress.
    Running,
    /// Finished without error.
    Succeeded,
    /// Failed with no attempts left.
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Constructed => "constructed",
            JobState::Validated => "validated",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A unit of background work.
///
/// The scheduling hints (`max_fails`, `max_concurrency`, `should_retry`) are
/// static declarations about the job type. Enforcing them is the engine's
/// business; see [crate::policy] for a reference driver.
#[async_trait::async_trait]
pub trait Job: fmt::Debug + Send + Sync {
    /// The job type name the scheduler dispatches on.
    fn name(&self) -> &'static str;

    /// How many additional attempts may follow a failure. Zero means never retry.
    fn max_fails(&self) -> u32;

    /// How many instances of this job type may run at once across the
    /// deployment. Zero means unbounded.
    fn max_concurrency(&self) -> u32;

    /// Whether this job type may be retried at all.
    fn should_retry(&self) -> bool;

    /// Check parameters without side effects. May be called any number of times.
    fn validate(&self, params: Option<&Parameters>) -> Result<(), ValidationError>;

    /// Perform the work, logging through and honouring cancellation of `ctx`.
    async fn run(&self, ctx: &JobContext, params: Option<&Parameters>) -> Result<(), JobError>;
}
