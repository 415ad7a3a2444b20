//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (services reference existing retry policies)
//! - Validate value ranges (thresholds > 0, delays ordered, capacities > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{BreakerSettings, GuardConfig};
use crate::resilience::retries::RetryPolicyConfig;

/// Largest accepted growth factor for breaker and retry backoff.
const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "admin.bind_address",
            format!("'{}' is not a socket address", config.admin.bind_address),
        ));
    }

    let cache = &config.cache;
    if cache.key_prefix.is_empty() {
        errors.push(ValidationError::new("cache.key_prefix", "must not be empty"));
    }
    if cache.max_key_length < 80 {
        errors.push(ValidationError::new(
            "cache.max_key_length",
            "must leave room for a hashed key (>= 80)",
        ));
    }
    if cache.local_capacity == 0 {
        errors.push(ValidationError::new("cache.local_capacity", "must be at least 1"));
    }
    if cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be greater than 0"));
    }
    if cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
    }
    if cache.remote_enabled && cache.remote_timeout_ms == 0 {
        errors.push(ValidationError::new("cache.remote_timeout_ms", "must be greater than 0"));
    }
    for (content_type, ttl) in &cache.ttl {
        if *ttl == 0 {
            errors.push(ValidationError::new(
                format!("cache.ttl.{}", content_type),
                "must be greater than 0",
            ));
        }
    }
    check_breaker("cache.remote_breaker", &cache.remote_breaker, &mut errors);

    check_breaker("breakers.default", &config.breakers.default, &mut errors);
    for (name, settings) in &config.breakers.services {
        check_breaker(&format!("breakers.services.{}", name), settings, &mut errors);
    }

    let pool = &config.pool;
    if pool.max_sockets_per_host == 0 {
        errors.push(ValidationError::new("pool.max_sockets_per_host", "must be at least 1"));
    }
    if pool.request_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.request_timeout_ms", "must be greater than 0"));
    }
    if pool.batching_enabled {
        if pool.batch_max_size == 0 {
            errors.push(ValidationError::new("pool.batch_max_size", "must be at least 1"));
        }
        if pool.batch_window_ms == 0 {
            errors.push(ValidationError::new("pool.batch_window_ms", "must be greater than 0"));
        }
    }
    check_breaker("pool.host_breaker", &pool.host_breaker, &mut errors);

    for (name, policy) in &config.retry.policies {
        check_policy(&format!("retry.policies.{}", name), policy, &mut errors);
    }

    let known_policy = |name: &str| {
        config.retry.policies.contains_key(name) || RetryPolicyConfig::builtin().contains_key(name)
    };
    if !known_policy(&config.retry.default_policy) {
        errors.push(ValidationError::new(
            "retry.default_policy",
            format!("unknown policy '{}'", config.retry.default_policy),
        ));
    }
    for (name, service) in &config.services {
        if let Some(policy) = &service.retry_policy {
            if !known_policy(policy) {
                errors.push(ValidationError::new(
                    format!("services.{}.retry_policy", name),
                    format!("unknown policy '{}'", policy),
                ));
            }
        }
        if let Some(pricing) = &service.pricing {
            if pricing.input_per_1k < 0.0 || pricing.output_per_1k < 0.0 {
                errors.push(ValidationError::new(
                    format!("services.{}.pricing", name),
                    "prices must not be negative",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(field: &str, s: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if s.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", field), "must be at least 1"));
    }
    if s.success_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.success_threshold", field), "must be at least 1"));
    }
    if s.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be greater than 0"));
    }
    check_multiplier(field, s.backoff_multiplier, errors);
}

fn check_multiplier(field: &str, multiplier: f64, errors: &mut Vec<ValidationError>) {
    if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
        errors.push(ValidationError::new(
            format!("{}.backoff_multiplier", field),
            "must be between 1.0 and 100.0",
        ));
    }
}

fn check_policy(field: &str, p: &RetryPolicyConfig, errors: &mut Vec<ValidationError>) {
    check_multiplier(field, p.backoff_multiplier, errors);
    if p.initial_delay_ms > p.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{}.initial_delay_ms", field),
            "cannot exceed max_delay_ms",
        ));
    }
}
