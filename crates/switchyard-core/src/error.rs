//! Error taxonomy shared by every switchyard layer.
//!
//! Backend calls fail with a [`BackendError`] classified by [`ErrorKind`].
//! The resilience layer wraps those failures in [`ResilienceError`] so callers
//! can tell a rejected call apart from a failed one by variant alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure
    Network,

    /// The call did not finish before its deadline
    Timeout,

    /// Backend asked us to slow down
    RateLimited,

    /// Backend reachable but not serving (5xx, draining)
    ServiceUnavailable,

    /// Request was malformed; repeating it cannot help
    Validation,

    /// Credentials rejected
    Authentication,

    /// Anything else
    Internal,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::ServiceUnavailable,
        ErrorKind::Validation,
        ErrorKind::Authentication,
        ErrorKind::Internal,
    ];

    /// Whether this kind usually clears up on its own.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A failed call to a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct BackendError {
    kind: ErrorKind,
    message: String,
}

impl BackendError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The failure classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Invalid configuration or out-of-range argument.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the resilience layer.
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The breaker rejected the call without running it.
    #[error("circuit '{operation}' is open, retry in {retry_after:?}")]
    CircuitOpen {
        operation: String,
        retry_after: Duration,
    },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ResilienceError>,
    },

    /// The protected call ran and failed.
    #[error("execution of '{operation}' failed: {source}")]
    ExecutionFailed {
        operation: String,
        #[source]
        source: Box<ResilienceError>,
    },

    /// The primary chain failed and the fallback was missing or failed too.
    #[error("primary and fallback both failed (primary: {primary}; fallback: {})", display_fallback(.fallback))]
    BothPathsFailed {
        primary: Box<ResilienceError>,
        fallback: Option<Box<ResilienceError>>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An unchanged backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller gave up before the chain finished.
    #[error("operation cancelled")]
    Cancelled,
}

fn display_fallback(fallback: &Option<Box<ResilienceError>>) -> String {
    match fallback {
        Some(err) => err.to_string(),
        None => "none configured".to_string(),
    }
}

impl ResilienceError {
    /// Kind of the backend failure carried directly by this error, if any.
    ///
    /// Only `Backend` answers; wrapped errors have already been through a
    /// resilience decision and are not reclassified.
    pub fn backend_kind(&self) -> Option<ErrorKind> {
        match self {
            ResilienceError::Backend(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Kind of the innermost backend failure, following wrappers.
    pub fn root_kind(&self) -> Option<ErrorKind> {
        match self {
            ResilienceError::Backend(err) => Some(err.kind()),
            ResilienceError::RetryExhausted { last, .. } => last.root_kind(),
            ResilienceError::ExecutionFailed { source, .. } => source.root_kind(),
            ResilienceError::BothPathsFailed { primary, .. } => primary.root_kind(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }
}
