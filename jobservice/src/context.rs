//! The context jobs run in.

use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

/// Ambient context handed to [crate::Job::run].
///
/// Jobs log through [JobContext::logger] and stop promptly when
/// [JobContext::system_context] is cancelled. They never create their own.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Uuid,
    job_name: String,
    span: Span,
    cancel: CancellationToken,
}

impl JobContext {
    /// A fresh context with its own cancellation token.
    pub fn new<S: Into<String>>(job_name: S) -> Self {
        Self::with_cancellation(job_name, CancellationToken::new())
    }

    /// A context which is cancelled along with `cancel`.
    pub fn with_cancellation<S: Into<String>>(job_name: S, cancel: CancellationToken) -> Self {
        let job_name = job_name.into();
        let job_id = Uuid::new_v4();
        let span = tracing::info_span!("job", id = %job_id, name = %job_name);

        Self {
            job_id,
            job_name,
            span,
            cancel,
        }
    }

    /// Unique id of this invocation.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// The job type name.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The span job events should be recorded in.
    pub fn logger(&self) -> &Span {
        &self.span
    }

    /// The cancellation signal for this job.
    pub fn system_context(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the job has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A context for one attempt or step, cancelled with its parent.
    pub fn child(&self) -> JobContext {
        Self {
            job_id: self.job_id,
            job_name: self.job_name.clone(),
            span: tracing::info_span!(parent: &self.span, "attempt"),
            cancel: self.cancel.child_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_is_cancelled_with_parent() {
        let parent = JobContext::new("TEST");
        let child = parent.child();
        assert_eq!(child.job_id(), parent.job_id());

        parent.system_context().cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_the_parent() {
        let parent = JobContext::new("TEST");
        parent.child().system_context().cancel();
        assert!(!parent.is_cancelled());
    }
}
