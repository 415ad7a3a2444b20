//! Health reporting.
//!
//! # Data Flow
//! ```text
//! health_check():
//!     → service breakers (breaker_manager.rs)
//!     → host breakers (pool/host.rs)
//!     → remote cache probe (cache/manager.rs)
//!     → verdict.rs (healthy | degraded | unhealthy)
//! ```
//!
//! # Design Decisions
//! - Only an open service breaker makes the process unhealthy
//! - Host and remote-cache trouble degrade but keep serving

pub mod verdict;

pub use verdict::{assess, HealthReport, HealthVerdict, HostHealth, RemoteCacheHealth};
