//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! lookup(key, type):
//!     → keys.rs (compose {prefix}:{type}:{key}, hash when too long)
//!     → strategy.rs (read order: local → remote → miss)
//!     → local.rs (bounded LRU, age-capped)
//!     → remote.rs (shared store, behind breaker + deadline)
//!     → backfill local on remote hit
//!
//! set(key, value, type, ttl?):
//!     → policy.rs (resolve TTL per content type)
//!     → remote first, then local regardless of remote outcome
//! ```
//!
//! # Design Decisions
//! - The remote tier is authoritative when reachable; local is a mirror
//! - Misses and remote failures are never errors for the caller
//! - Tier order lives in one strategy object, not in scattered conditionals

pub mod entry;
pub mod keys;
pub mod local;
pub mod manager;
pub mod policy;
pub mod remote;
pub mod strategy;

pub use entry::CacheEntry;
pub use keys::{fingerprint, KeyBuilder};
pub use manager::{CacheHit, CacheManager, CacheMetrics, ClearOutcome};
pub use policy::TtlPolicy;
pub use remote::{MemoryStore, RemoteStore};
pub use strategy::{Tier, TierStrategy};
