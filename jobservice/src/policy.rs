//! A reference driver for the job contract.
//!
//! Engines own scheduling. This module shows how a conforming engine applies
//! a job's declared hints: [Admission] bounds concurrency per job type, and
//! [execute] validates, runs, and retries according to [RetryPolicy].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::Instrument as _;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::{Job, JobState, Parameters};

/// Retry limits declared by a job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    should_retry: bool,
    max_fails: u32,
}

impl RetryPolicy {
    /// The policy `job` declares.
    pub fn of(job: &dyn Job) -> Self {
        Self {
            should_retry: job.should_retry(),
            max_fails: job.max_fails(),
        }
    }

    /// Whether another attempt may follow `failures` failed attempts.
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.should_retry && failures <= self.max_fails
    }

    /// The most attempts a single execution may make.
    pub fn max_attempts(&self) -> u32 {
        if self.should_retry {
            self.max_fails.saturating_add(1)
        } else {
            1
        }
    }
}

/// Per-job-type concurrency limits.
#[derive(Debug, Default)]
pub struct Admission {
    limits: Mutex<HashMap<&'static str, Option<Arc<Semaphore>>>>,
}

/// Held while a job runs. Dropping it admits the next waiter.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Admission {
    /// Admission with no limits recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, job: &dyn Job) -> Option<Arc<Semaphore>> {
        let mut limits = self.limits.lock();
        limits
            .entry(job.name())
            .or_insert_with(|| match job.max_concurrency() {
                0 => None,
                limit => Some(Arc::new(Semaphore::new(limit as usize))),
            })
            .clone()
    }

    /// Wait for a slot to run `job`, giving up if `ctx` is cancelled.
    pub async fn acquire(
        &self,
        job: &dyn Job,
        ctx: &JobContext,
    ) -> Result<AdmissionPermit, JobError> {
        let Some(semaphore) = self.semaphore(job) else {
            return Ok(AdmissionPermit { _permit: None });
        };

        tokio::select! {
            biased;
            _ = ctx.system_context().cancelled() => Err(JobError::Cancelled),
            permit = semaphore.acquire_owned() => {
                let permit = permit.map_err(|_| JobError::Cancelled)?;
                Ok(AdmissionPermit { _permit: Some(permit) })
            }
        }
    }
}

/// The result of [execute].
#[derive(Debug)]
pub struct Execution {
    /// Final state, either succeeded or failed.
    pub state: JobState,
    /// Attempts made at [Job::run]. Zero when validation failed.
    pub attempts: u32,
    /// The error from the last attempt, if the job failed.
    pub error: Option<JobError>,
}

impl Execution {
    /// Whether the job finished successfully.
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// Validate and run `job`, retrying retryable failures as its policy allows.
pub async fn execute(job: &dyn Job, ctx: &JobContext, params: Option<&Parameters>) -> Execution {
    let span = ctx.logger().clone();
    async move {
        if let Err(error) = job.validate(params) {
            tracing::warn!(%error, "job parameters rejected");
            return Execution {
                state: JobState::Failed,
                attempts: 0,
                error: Some(error.into()),
            };
        }
        tracing::debug!(state = %JobState::Validated, "job parameters accepted");

        let policy = RetryPolicy::of(job);
        let mut failures = 0;
        loop {
            let attempt = ctx.child();
            tracing::debug!(state = %JobState::Running, attempt = failures + 1, "running job");

            let result = job
                .run(&attempt, params)
                .instrument(attempt.logger().clone())
                .await;

            let error = match result {
                Ok(()) => {
                    tracing::info!(attempts = failures + 1, "job succeeded");
                    return Execution {
                        state: JobState::Succeeded,
                        attempts: failures + 1,
                        error: None,
                    };
                }
                Err(error) => error,
            };

            failures += 1;
            let retry =
                error.is_retryable() && policy.allows_retry(failures) && !ctx.is_cancelled();
            if !retry {
                tracing::error!(%error, attempts = failures, "job failed");
                return Execution {
                    state: JobState::Failed,
                    attempts: failures,
                    error: Some(error),
                };
            }
            tracing::warn!(%error, attempts = failures, "job attempt failed, retrying");
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::params::ValidationError;

    #[derive(Debug)]
    struct Limits {
        max_fails: u32,
        should_retry: bool,
    }

    #[async_trait::async_trait]
    impl Job for Limits {
        fn name(&self) -> &'static str {
            "LIMITS"
        }

        fn max_fails(&self) -> u32 {
            self.max_fails
        }

        fn max_concurrency(&self) -> u32 {
            0
        }

        fn should_retry(&self) -> bool {
            self.should_retry
        }

        fn validate(&self, _params: Option<&Parameters>) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn run(&self, _ctx: &JobContext, _params: Option<&Parameters>) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn retry_policy_limits() {
        let policy = RetryPolicy::of(&Limits {
            max_fails: 3,
            should_retry: true,
        });
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
        assert_eq!(policy.max_attempts(), 4);

        let never = RetryPolicy::of(&Limits {
            max_fails: 3,
            should_retry: false,
        });
        assert!(!never.allows_retry(1));
        assert_eq!(never.max_attempts(), 1);

        let zero = RetryPolicy::of(&Limits {
            max_fails: 0,
            should_retry: true,
        });
        assert!(!zero.allows_retry(1));
        assert_eq!(zero.max_attempts(), 1);
    }

    #[tokio::test]
    async fn unbounded_jobs_are_always_admitted() {
        let admission = Admission::new();
        let job = Limits {
            max_fails: 0,
            should_retry: false,
        };
        let ctx = JobContext::new("LIMITS");
        let _first = admission.acquire(&job, &ctx).await.unwrap();
        let _second = admission.acquire(&job, &ctx).await.unwrap();
    }
}
