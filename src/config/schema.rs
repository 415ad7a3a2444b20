//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::resilience::retries::RetryPolicyConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Operational HTTP surface.
    pub admin: AdminConfig,

    /// Dual-tier response cache.
    pub cache: CacheConfig,

    /// Per-dependency circuit breakers.
    pub breakers: BreakersConfig,

    /// Host-aware connection pool and batching.
    pub pool: PoolConfig,

    /// Named retry policies.
    pub retry: RetryConfig,

    /// Per-service settings keyed by dependency name.
    pub services: HashMap<String, ServiceConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin/health HTTP server.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,

    /// Per-request timeout for admin handlers in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prefix for every key.
    pub key_prefix: String,

    /// Composed keys longer than this are replaced by a content hash.
    pub max_key_length: usize,

    /// Maximum entries held in the local tier.
    pub local_capacity: usize,

    /// Upper bound on local entry age regardless of TTL, in seconds.
    pub local_max_age_secs: u64,

    /// Interval between sweeps of expired local entries, in seconds.
    pub sweep_interval_secs: u64,

    /// TTL for content types without an explicit entry.
    pub default_ttl_secs: u64,

    /// Use the shared remote tier.
    pub remote_enabled: bool,

    /// Deadline for each remote-tier operation in milliseconds.
    pub remote_timeout_ms: u64,

    /// Capacity of the in-process remote store (least recently used evicted).
    pub remote_max_entries: usize,

    /// Breaker guarding the remote tier.
    pub remote_breaker: BreakerSettings,

    /// TTL in seconds per content type.
    pub ttl: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "guard".to_string(),
            max_key_length: 250,
            local_capacity: 1000,
            local_max_age_secs: 3600,
            sweep_interval_secs: 60,
            default_ttl_secs: 600,
            remote_enabled: true,
            remote_timeout_ms: 500,
            remote_max_entries: 100_000,
            remote_breaker: BreakerSettings {
                failure_threshold: 3,
                success_threshold: 1,
                timeout_ms: 30_000,
                max_timeout_ms: 120_000,
                backoff_multiplier: 2.0,
            },
            ttl: HashMap::from([
                ("completion".to_string(), 3600),
                ("template".to_string(), 1800),
                ("config".to_string(), 300),
                ("health-status".to_string(), 30),
            ]),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,

    /// Base open duration in milliseconds.
    pub timeout_ms: u64,

    /// Cap for the grown open duration in milliseconds.
    pub max_timeout_ms: u64,

    /// Growth factor of the open duration per reopening.
    pub backoff_multiplier: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            max_timeout_ms: 300_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Breaker registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BreakersConfig {
    /// Settings for dependencies without an override.
    pub default: BreakerSettings,

    /// Per-dependency overrides.
    pub services: HashMap<String, BreakerSettings>,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent requests per remote host; excess requests queue.
    pub max_sockets_per_host: usize,

    /// Idle keep-alive connections retained per host.
    pub max_idle_per_host: usize,

    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Default per-request deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// Enable request batching.
    pub batching_enabled: bool,

    /// Maximum requests dispatched in one batch.
    pub batch_max_size: usize,

    /// How long a batch stays open for new members, in milliseconds.
    pub batch_window_ms: u64,

    /// Breaker applied to each host.
    pub host_breaker: BreakerSettings,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets_per_host: 10,
            max_idle_per_host: 10,
            idle_timeout_secs: 90,
            connect_timeout_ms: 5000,
            request_timeout_ms: 60_000,
            batching_enabled: true,
            batch_max_size: 10,
            batch_window_ms: 10,
            host_breaker: BreakerSettings {
                failure_threshold: 5,
                success_threshold: 1,
                timeout_ms: 30_000,
                max_timeout_ms: 120_000,
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Policy used by services that do not name one.
    pub default_policy: String,

    /// Additional or replacement policies, layered over the built-in set.
    pub policies: HashMap<String, RetryPolicyConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_policy: "api".to_string(),
            policies: HashMap::new(),
        }
    }
}

/// Settings for one upstream dependency.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Retry policy name; falls back to `retry.default_policy`.
    pub retry_policy: Option<String>,

    /// Token pricing used to report call cost.
    pub pricing: Option<Pricing>,
}

/// Price per thousand tokens.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}
