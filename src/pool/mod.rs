//! Outbound connection pool.
//!
//! # Data Flow
//! ```text
//! request(descriptor):
//!     → transport.rs (resolve scheme://host:port)
//!     → host.rs (host breaker open? fail fast, no network)
//!     → batcher.rs (batchable? join or open the host's batch for this method)
//!     → host.rs (wait for a socket slot)
//!     → host breaker → deadline → Connection::send → classify status
//! ```
//!
//! # Design Decisions
//! - One pooled client and one breaker per host
//! - Per-host concurrency cap; excess requests queue on a semaphore
//! - Batches are bounded by size and time window; members keep individual results
//! - The pool never retries; it only classifies and propagates

pub mod batcher;
pub mod host;
pub mod manager;
pub mod transport;

pub use host::{ConnectionGuard, HostEntry, HostMetrics};
pub use manager::{ConnectionPoolManager, PoolMetrics, PoolSettings};
pub use transport::{
    classify_response, Connection, Connector, HttpConnector, RequestDescriptor, UpstreamResponse,
};
