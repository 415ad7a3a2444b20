//! Completion gateway.
//!
//! # Data Flow
//! ```text
//! complete(call):
//!     → cache lookup (hit returns immediately, marked cached)
//!     → coalesce.rs (identical in-flight misses wait for the leader)
//!     → retry policy for the service
//!     → service circuit breaker
//!     → pool request → completion.rs (parse text + usage, price it)
//!     → cache write with the content type's TTL
//! ```
//!
//! # Design Decisions
//! - One upstream call per distinct concurrent miss
//! - Waiters get the leader's result, failures included
//! - Cache bypass skips reads, writes and coalescing

pub mod client;
pub mod coalesce;
pub mod completion;

pub use client::{ClientMetrics, ResilientClient};
pub use coalesce::Coalescer;
pub use completion::{parse_completion, CompletionCall, CompletionOutcome, Usage};
