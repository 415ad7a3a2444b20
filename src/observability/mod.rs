//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, retries, cache tiers and the pool produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → events.rs (typed broadcast events for in-process subscribers)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Health reporting and tests (event subscribers)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Events replace callback hooks: no hidden control flow in publishers

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventBus, ResilienceEvent};
