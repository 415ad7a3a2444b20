//! Failure taxonomy shared by every resilience component.
//!
//! Each variant records whether it is retryable and, where relevant, a numeric
//! hint (retry-after, timeout value). Callers dispatch on [`ErrorKind`] rather
//! than on concrete variants.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitState;

/// Coarse classification used by retry policies and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CircuitOpen,
    RateLimit,
    ExternalService,
    Timeout,
    Network,
    Validation,
    RetryExhausted,
    PoolClosed,
    Internal,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the breaker, retry, cache and pool layers.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// Fail-fast rejection from an open circuit.
    #[error("service '{name}' unavailable: circuit {state}, next attempt in {retry_in_ms}ms")]
    CircuitOpen {
        name: String,
        state: CircuitState,
        retry_in_ms: u64,
    },

    /// Upstream asked us to slow down.
    #[error("rate limited (status {status}), retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, status: u16 },

    /// Upstream answered with a failure status.
    #[error("external service error (status {status}): {message}")]
    ExternalService { status: u16, message: String },

    /// A network call exceeded its deadline.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection-level failure (refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// Caller error; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Aggregate failure after the retry budget was spent.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ResilienceError>,
    },

    /// The connection pool is shutting down.
    #[error("connection pool is closed")]
    PoolClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResilienceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::RateLimited { .. } => ErrorKind::RateLimit,
            ResilienceError::ExternalService { .. } => ErrorKind::ExternalService,
            ResilienceError::Timeout { .. } => ErrorKind::Timeout,
            ResilienceError::Network(_) => ErrorKind::Network,
            ResilienceError::Validation(_) => ErrorKind::Validation,
            ResilienceError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ResilienceError::PoolClosed => ErrorKind::PoolClosed,
            ResilienceError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this failure may succeed if tried again.
    ///
    /// External-service errors are only retryable for 5xx, 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResilienceError::RateLimited { .. }
            | ResilienceError::Timeout { .. }
            | ResilienceError::Network(_) => true,
            ResilienceError::ExternalService { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ResilienceError::CircuitOpen { .. }
            | ResilienceError::Validation(_)
            | ResilienceError::RetryExhausted { .. }
            | ResilienceError::PoolClosed
            | ResilienceError::Internal(_) => false,
        }
    }

    /// HTTP status carried by the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ResilienceError::RateLimited { status, .. } => Some(*status),
            ResilienceError::ExternalService { status, .. } => Some(*status),
            ResilienceError::RetryExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    /// Explicit server-provided wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::RateLimited { retry_after_secs, .. } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    /// Numeric hint in milliseconds: retry-after, timeout value, or time until
    /// an open circuit admits a probe.
    pub fn hint_ms(&self) -> Option<u64> {
        match self {
            ResilienceError::RateLimited { retry_after_secs, .. } => {
                Some(retry_after_secs.saturating_mul(1000))
            }
            ResilienceError::Timeout { timeout_ms } => Some(*timeout_ms),
            ResilienceError::CircuitOpen { retry_in_ms, .. } => Some(*retry_in_ms),
            _ => None,
        }
    }

    /// Innermost cause, unwrapping retry aggregates.
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            ResilienceError::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

/// Result type for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;
