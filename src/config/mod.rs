//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → used to build the ResilientClient
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ResilientClient::apply_config swaps TTLs, breaker thresholds, retry policies
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes arrive as whole new configs
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Pool limits are fixed at startup; other sections hot-reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerSettings, BreakersConfig, CacheConfig, GuardConfig, LogFormat,
    ObservabilityConfig, PoolConfig, Pricing, RetryConfig, ServiceConfig,
};
pub use watcher::ConfigWatcher;
