//! Resilience and caching layer for outbound calls to completion APIs.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod resilience;

pub use config::schema::GuardConfig;
pub use error::{ErrorKind, ResilienceError, Result};
pub use gateway::{CompletionCall, CompletionOutcome, ResilientClient};
pub use lifecycle::Shutdown;
