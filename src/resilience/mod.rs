//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → retries.rs (named policy decides whether and when to try again)
//!     → breaker_manager.rs (look up breaker for the dependency name)
//!     → circuit_breaker.rs (fail fast when open, record the outcome)
//!     → timeouts.rs (every network call has a deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry policy is the sole retry authority
//! - Circuit breakers are per dependency, created on first use
//! - Registries are owned values passed by the composing process, not globals

pub mod backoff;
pub mod breaker_manager;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use breaker_manager::{BreakerHealth, BreakerHealthReport, CircuitBreakerManager};
pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retries::{RetryManager, RetryOverrides, RetryPolicy, RetryPolicyConfig};
pub use timeouts::with_timeout;
