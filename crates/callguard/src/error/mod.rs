//! Error types for the resilience pipeline
//!
//! Two families of errors exist:
//!
//! 1. **[`ResilienceError<E>`]**: returned from every `execute` call. It is
//!    generic over the wrapped operation's error `E`; structural rejections
//!    (queue full, expired, circuit open, shutdown) are their own variants and
//!    the operation's own failure travels untouched in
//!    [`ResilienceError::Operation`].
//! 2. **[`CallguardError`]**: infrastructure failures (configuration,
//!    snapshot I/O, serialization). Cache persistence never surfaces these to
//!    `get`/`set` callers; they are logged and dropped.
//!
//! [`CallError`] is a ready-made transport-boundary error for raw calls that
//! do not have a richer error type of their own.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::resilience::ClassifyError;

/// Errors that can occur while pushing a call through the pipeline
///
/// Admission and breaker failures short-circuit before any network call
/// happens. When the operation itself fails, the original error is returned
/// in [`ResilienceError::Operation`] unchanged.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The admission queue already holds `capacity` pending requests
    #[error("Rate limiter queue is full ({capacity} pending requests)")]
    QueueFull { capacity: usize },

    /// The request aged out while waiting for admission
    #[error("Request expired after waiting {waited:?} for admission")]
    RequestExpired { waited: Duration },

    /// The admission queue was cleared while the request was waiting
    #[error("Request was removed from the admission queue")]
    QueueCleared,

    /// The limiter has been shut down
    #[error("Rate limiter is shutting down")]
    ShuttingDown,

    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, next attempt in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The underlying operation failed
    #[error(transparent)]
    Operation(E),
}

/// Result type for pipeline operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E> {
    /// True for every structural rejection, false for operation failures
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// Borrow the operation's error if this is an operation failure
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Take the operation's error if this is an operation failure
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Convert the operation error type, keeping rejections as they are
    pub fn map_operation<F, M>(self, f: M) -> ResilienceError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self.into_rejection() {
            Ok(rejection) => rejection,
            Err(error) => ResilienceError::Operation(f(error)),
        }
    }

    /// Split a rejection from an operation failure.
    ///
    /// Rejections are re-typed for any operation error type; operation
    /// failures hand back `E`.
    pub fn into_rejection<F>(self) -> Result<ResilienceError<F>, E> {
        match self {
            Self::QueueFull { capacity } => Ok(ResilienceError::QueueFull { capacity }),
            Self::RequestExpired { waited } => Ok(ResilienceError::RequestExpired { waited }),
            Self::QueueCleared => Ok(ResilienceError::QueueCleared),
            Self::ShuttingDown => Ok(ResilienceError::ShuttingDown),
            Self::CircuitOpen { retry_after } => Ok(ResilienceError::CircuitOpen { retry_after }),
            Self::Operation(error) => Err(error),
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapse the nesting produced by stacking one component inside another
    pub fn flatten(self) -> ResilienceError<E> {
        match self.into_rejection() {
            Ok(rejection) => rejection,
            Err(inner) => inner,
        }
    }
}

/// Infrastructure errors: configuration, persistence and serialization
#[derive(Debug, Error)]
pub enum CallguardError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration value failed validation
    #[error("Invalid configuration for `{field}`: {message}")]
    InvalidConfig { field: &'static str, message: String },

    /// Filesystem failure while reading or writing a snapshot
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A snapshot was written by an incompatible format version
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedSnapshotVersion { found: String, expected: u32 },
}

/// Result type for infrastructure operations
pub type CallguardResult<T> = Result<T, CallguardError>;

impl CallguardError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error for a single configuration field
    pub fn invalid<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::InvalidConfig { field, message: message.into() }
    }
}

/// Broad category of a raw call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    /// Connection-level failure (reset, refused, DNS)
    Network,
    /// The server answered with an error status
    Http,
    /// The provider signalled that its quota was exceeded
    RateLimited,
    /// The call did not finish in time
    Timeout,
    /// Anything else
    Other,
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Http => write!(f, "http"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "call"),
        }
    }
}

/// Transport-boundary error for raw outbound calls
///
/// Carries the signals [`RetryPolicy`](crate::RetryPolicy) classifies on: a
/// transient network code, an HTTP status, or an explicit rate-limit/timeout
/// marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct CallError {
    pub kind: CallErrorKind,
    pub code: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

impl CallError {
    /// Connection-level failure with a network error code such as
    /// `ECONNRESET`
    pub fn network<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            kind: CallErrorKind::Network,
            code: Some(code.into()),
            status: None,
            message: message.into(),
        }
    }

    /// Error response from the server
    pub fn http<M: Into<String>>(status: u16, message: M) -> Self {
        Self { kind: CallErrorKind::Http, code: None, status: Some(status), message: message.into() }
    }

    /// Provider quota exceeded
    pub fn rate_limited<M: Into<String>>(message: M) -> Self {
        Self {
            kind: CallErrorKind::RateLimited,
            code: None,
            status: Some(429),
            message: message.into(),
        }
    }

    /// Call timed out
    pub fn timeout<M: Into<String>>(message: M) -> Self {
        Self { kind: CallErrorKind::Timeout, code: None, status: None, message: message.into() }
    }

    /// Failure with no retry signal
    pub fn other<M: Into<String>>(message: M) -> Self {
        Self { kind: CallErrorKind::Other, code: None, status: None, message: message.into() }
    }
}

impl ClassifyError for CallError {
    fn error_code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn is_rate_limited(&self) -> bool {
        self.kind == CallErrorKind::RateLimited
    }

    fn is_timeout(&self) -> bool {
        self.kind == CallErrorKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_is_not_a_rejection() {
        let err: ResilienceError<CallError> = ResilienceError::Operation(CallError::other("boom"));
        assert!(!err.is_rejection());
        assert_eq!(err.to_string(), "call error: boom");
        assert_eq!(err.into_operation_error(), Some(CallError::other("boom")));
    }

    #[test]
    fn test_flatten_nested_errors() {
        let nested: ResilienceError<ResilienceError<CallError>> =
            ResilienceError::Operation(ResilienceError::CircuitOpen {
                retry_after: Duration::from_secs(3),
            });
        assert!(matches!(
            nested.flatten(),
            ResilienceError::CircuitOpen { retry_after } if retry_after == Duration::from_secs(3)
        ));

        let outer: ResilienceError<ResilienceError<CallError>> =
            ResilienceError::QueueFull { capacity: 4 };
        assert!(matches!(outer.flatten(), ResilienceError::QueueFull { capacity: 4 }));

        let inner_failure: ResilienceError<ResilienceError<CallError>> =
            ResilienceError::Operation(ResilienceError::Operation(CallError::timeout("slow")));
        assert_eq!(
            inner_failure.flatten().into_operation_error(),
            Some(CallError::timeout("slow"))
        );
    }

    #[test]
    fn test_map_operation_keeps_rejections() {
        let err: ResilienceError<CallError> = ResilienceError::ShuttingDown;
        let mapped: ResilienceError<String> = err.map_operation(|e| e.message);
        assert!(matches!(mapped, ResilienceError::ShuttingDown));

        let err: ResilienceError<CallError> = ResilienceError::Operation(CallError::other("x"));
        let mapped = err.map_operation(|e| e.message);
        assert_eq!(mapped.operation_error().map(String::as_str), Some("x"));
    }

    #[test]
    fn test_call_error_signals() {
        let err = CallError::network("ECONNRESET", "socket hang up");
        assert_eq!(err.error_code(), Some("ECONNRESET"));
        assert_eq!(err.status_code(), None);

        let err = CallError::rate_limited("slow down");
        assert!(err.is_rate_limited());
        assert_eq!(err.status_code(), Some(429));

        assert!(CallError::timeout("deadline").is_timeout());
        assert!(!CallError::other("nope").is_timeout());
    }

    #[test]
    fn test_invalid_config_display() {
        let err = CallguardError::invalid("queue_size", "must be greater than 0");
        assert_eq!(err.to_string(), "Invalid configuration for `queue_size`: must be greater than 0");
    }
}
