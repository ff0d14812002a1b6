//! Errors raised by registry adapters.

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes adapter errors by what the caller should do about them,
/// independent of the backend that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The adapter intentionally does not support this operation.
    ///
    /// **Retryable:** No. Route to another adapter or fail the task.
    NotImplemented,

    /// The adapter does not offer a required capability tier at all.
    ///
    /// **Retryable:** No.
    Unsupported,

    /// The namespace, manifest, blob or tag does not exist.
    ///
    /// **Retryable:** No. Distinct from "could not check".
    NotFound,

    /// The request was malformed: missing routing data, bad ranges, digest mismatch.
    ///
    /// **Retryable:** No. Surfaced before any I/O where possible.
    InvalidRequest,

    /// The remote rejected our credentials.
    ///
    /// **Retryable:** No, unless credentials are updated.
    Unauthorized,

    /// Network or remote-side failure.
    ///
    /// **Retryable:** Yes, through the job's retry budget.
    Transport,

    /// A payload could not be encoded or decoded.
    ///
    /// **Retryable:** No.
    Serialization,

    /// The operation was aborted because its context was cancelled.
    ///
    /// **Retryable:** No. The engine decided to stop.
    Cancelled,

    /// Anything else.
    Other,
}

impl AdapterErrorKind {
    /// Whether a job should spend a retry on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterErrorKind::Transport)
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterErrorKind::NotImplemented => write!(f, "not implemented"),
            AdapterErrorKind::Unsupported => write!(f, "capability not supported"),
            AdapterErrorKind::NotFound => write!(f, "not found"),
            AdapterErrorKind::InvalidRequest => write!(f, "invalid request"),
            AdapterErrorKind::Unauthorized => write!(f, "unauthorized"),
            AdapterErrorKind::Transport => write!(f, "transport error"),
            AdapterErrorKind::Serialization => write!(f, "serialization error"),
            AdapterErrorKind::Cancelled => write!(f, "cancelled"),
            AdapterErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// A message-only error used when there is no underlying cause.
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// An error raised by an adapter operation.
///
/// Carries the semantic [AdapterErrorKind], the adapter that produced it,
/// optional context, the underlying cause, and the backtrace and span trace
/// at the point of creation.
#[derive(Debug)]
pub struct AdapterError {
    kind: AdapterErrorKind,
    adapter: &'static str,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for AdapterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl AdapterError {
    /// Create a new adapter error.
    pub fn new<E>(adapter: &'static str, kind: AdapterErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            adapter,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create an error with context attached.
    pub fn builder<E>(adapter: &'static str, kind: AdapterErrorKind, error: E) -> AdapterErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        AdapterErrorBuilder {
            adapter,
            kind,
            source: error.into(),
            context: None,
        }
    }

    /// A closure suitable for `map_err`.
    pub fn with<E>(
        adapter: &'static str,
        kind: AdapterErrorKind,
    ) -> Box<dyn FnOnce(E) -> AdapterError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| AdapterError::new(adapter, kind, error))
    }

    /// The adapter does not support `operation`.
    pub fn not_implemented(adapter: &'static str, operation: &str) -> Self {
        Self::new(
            adapter,
            AdapterErrorKind::NotImplemented,
            Message(format!("{operation} is not implemented")),
        )
    }

    /// `what` does not exist.
    pub fn not_found(adapter: &'static str, what: impl fmt::Display) -> Self {
        Self::new(
            adapter,
            AdapterErrorKind::NotFound,
            Message(format!("{what} not found")),
        )
    }

    /// The request was invalid for the given reason.
    pub fn invalid(adapter: &'static str, reason: impl fmt::Display) -> Self {
        Self::new(
            adapter,
            AdapterErrorKind::InvalidRequest,
            Message(reason.to_string()),
        )
    }

    /// The operation was cancelled.
    pub fn cancelled(adapter: &'static str) -> Self {
        Self::new(
            adapter,
            AdapterErrorKind::Cancelled,
            Message("operation cancelled".into()),
        )
    }

    /// What went wrong, in terms callers can act on.
    pub fn kind(&self) -> AdapterErrorKind {
        self.kind
    }

    /// Name of the adapter which raised the error.
    pub fn adapter(&self) -> &'static str {
        self.adapter
    }

    /// Context attached when the error was built.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether retrying the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == AdapterErrorKind::NotFound
    }

    /// Whether the adapter does not support the operation.
    pub fn is_not_implemented(&self) -> bool {
        self.kind == AdapterErrorKind::NotImplemented
    }

    /// Look for a specific error type in the source.
    pub fn downcast_source<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Backtrace captured when the error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Tracing spans active when the error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter error [{}] from {}", self.kind, self.adapter)?;

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for an [AdapterError] with context.
#[derive(Debug)]
pub struct AdapterErrorBuilder {
    kind: AdapterErrorKind,
    adapter: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    context: Option<String>,
}

impl AdapterErrorBuilder {
    /// Set additional context, such as the repository or digest involved.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Capture traces and finish the error.
    pub fn build(self) -> AdapterError {
        AdapterError {
            kind: self.kind,
            adapter: self.adapter,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(AdapterErrorKind::Transport.is_retryable());
        assert!(!AdapterErrorKind::NotImplemented.is_retryable());
        assert!(!AdapterErrorKind::NotFound.is_retryable());
        assert!(!AdapterErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn display_includes_adapter_and_context() {
        let err = AdapterError::builder(
            "memory",
            AdapterErrorKind::NotFound,
            Message("blob sha256:abc".into()),
        )
        .context("library/hello")
        .build();

        assert_eq!(
            err.to_string(),
            "adapter error [not found] from memory (library/hello): blob sha256:abc"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn source_can_be_downcast() {
        let err = AdapterError::new(
            "test",
            AdapterErrorKind::Serialization,
            serde_json::from_str::<u8>("x").unwrap_err(),
        );
        assert!(err.downcast_source::<serde_json::Error>().is_some());
    }
}
