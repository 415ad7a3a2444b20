//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth another attempt
//! - Compute the wait before that attempt (backoff, jitter, retry-after)
//! - Keep a registry of named policies for different latency/cost tradeoffs
//!
//! # Design Decisions
//! - This is the only layer that retries; breakers and the pool only classify
//! - Attempt N+1 never starts before attempt N failed and its delay elapsed
//! - A server-provided retry-after hint overrides backoff math
//! - Exhaustion yields one aggregate error carrying the attempt count and last cause

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::{EventBus, ResilienceEvent};
use crate::resilience::backoff::{exponential_delay, jitter};

/// Immutable retry parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_error_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_error_kinds: vec![
                ErrorKind::Timeout,
                ErrorKind::Network,
                ErrorKind::RateLimit,
                ErrorKind::ExternalService,
            ],
        }
    }
}

impl RetryPolicyConfig {
    /// Interactive calls: give up quickly.
    pub fn fast() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            ..Self::default()
        }
    }

    /// General provider API calls.
    pub fn api() -> Self {
        Self::default()
    }

    /// Expensive calls where a duplicate is costly: few, widely spaced retries.
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 2000,
            max_delay_ms: 30_000,
            backoff_multiplier: 3.0,
            ..Self::default()
        }
    }

    /// Rate-limited endpoints: long waits, honor retry-after.
    pub fn rate_limit() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 5000,
            max_delay_ms: 60_000,
            retryable_status_codes: vec![429, 503],
            retryable_error_kinds: vec![ErrorKind::RateLimit],
            ..Self::default()
        }
    }

    /// Third-party services outside our control.
    pub fn external() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
            ..Self::default()
        }
    }

    /// Built-in named policies.
    pub fn builtin() -> HashMap<String, RetryPolicyConfig> {
        HashMap::from([
            ("fast".to_string(), Self::fast()),
            ("api".to_string(), Self::api()),
            ("conservative".to_string(), Self::conservative()),
            ("rate-limit".to_string(), Self::rate_limit()),
            ("external".to_string(), Self::external()),
        ])
    }
}

/// Partial overrides for ad-hoc policies.
#[derive(Debug, Clone, Default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_enabled: Option<bool>,
}

impl RetryOverrides {
    fn apply(&self, mut base: RetryPolicyConfig) -> RetryPolicyConfig {
        if let Some(v) = self.max_retries {
            base.max_retries = v;
        }
        if let Some(v) = self.initial_delay_ms {
            base.initial_delay_ms = v;
        }
        if let Some(v) = self.max_delay_ms {
            base.max_delay_ms = v;
        }
        if let Some(v) = self.backoff_multiplier {
            base.backoff_multiplier = v;
        }
        if let Some(v) = self.jitter_enabled {
            base.jitter_enabled = v;
        }
        base
    }
}

/// A named, immutable retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    config: RetryPolicyConfig,
    events: EventBus,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>, config: RetryPolicyConfig, events: EventBus) -> Self {
        Self {
            name: name.into(),
            config,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Whether attempt `attempt` (0-based) that failed with `error` should be retried.
    pub fn should_retry(&self, error: &ResilienceError, attempt: u32) -> bool {
        if attempt >= self.config.max_retries || !error.is_retryable() {
            return false;
        }
        let kind_listed = self.config.retryable_error_kinds.contains(&error.kind());
        let status_listed = error
            .status_code()
            .map(|s| self.config.retryable_status_codes.contains(&s))
            .unwrap_or(false);
        kind_listed || status_listed
    }

    /// Wait before the attempt following `attempt`.
    pub fn calculate_delay(&self, attempt: u32, error: Option<&ResilienceError>) -> Duration {
        if let Some(retry_after) = error.and_then(|e| e.retry_after()) {
            return retry_after;
        }
        let delay = exponential_delay(
            attempt,
            self.config.initial_delay_ms,
            self.config.backoff_multiplier,
            self.config.max_delay_ms,
        );
        if self.config.jitter_enabled {
            jitter(delay)
        } else {
            delay
        }
    }

    /// Invoke `f` until it succeeds, fails permanently, or retries run out.
    ///
    /// A non-retryable failure is returned unchanged. Running out of retries on a
    /// retryable failure returns [`ResilienceError::RetryExhausted`].
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(policy = %self.name, attempts = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.should_retry(&err, attempt) {
                if err.is_retryable() && attempt >= self.config.max_retries {
                    tracing::warn!(
                        policy = %self.name,
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(ResilienceError::RetryExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                return Err(err);
            }

            let delay = self.calculate_delay(attempt, Some(&err));
            tracing::info!(
                policy = %self.name,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            metrics::record_retry(&self.name);
            self.events.publish(ResilienceEvent::RetryScheduled {
                policy: self.name.clone(),
                attempt: attempt + 1,
                delay,
            });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Registry of named retry policies.
#[derive(Debug)]
pub struct RetryManager {
    policies: DashMap<String, Arc<RetryPolicy>>,
    events: EventBus,
}

impl RetryManager {
    /// Empty registry.
    pub fn new(events: EventBus) -> Self {
        Self {
            policies: DashMap::new(),
            events,
        }
    }

    /// Registry pre-populated with `fast`, `api`, `conservative`, `rate-limit` and `external`.
    pub fn with_defaults(events: EventBus) -> Self {
        let manager = Self::new(events);
        for (name, config) in RetryPolicyConfig::builtin() {
            manager.register_policy(&name, config);
        }
        manager
    }

    /// Register or replace a named policy.
    pub fn register_policy(&self, name: &str, config: RetryPolicyConfig) -> Arc<RetryPolicy> {
        let policy = Arc::new(RetryPolicy::new(name, config, self.events.clone()));
        self.policies.insert(name.to_string(), policy.clone());
        policy
    }

    pub fn get_policy(&self, name: &str) -> Option<Arc<RetryPolicy>> {
        self.policies.get(name).map(|p| p.clone())
    }

    pub fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run `f` under the named policy. Unknown names are a caller error.
    pub async fn execute_with_policy<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self
            .get_policy(name)
            .ok_or_else(|| ResilienceError::Validation(format!("unknown retry policy '{}'", name)))?;
        policy.execute(f).await
    }

    /// Run `f` under an ad-hoc policy built from the defaults plus `overrides`.
    pub async fn execute<F, Fut, T>(&self, f: F, overrides: RetryOverrides) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = overrides.apply(RetryPolicyConfig::default());
        RetryPolicy::new("ad-hoc", config, self.events.clone()).execute(f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(config: RetryPolicyConfig) -> RetryPolicy {
        RetryPolicy::new("test", config, EventBus::new())
    }

    fn no_jitter() -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_enabled: false,
            ..Default::default()
        }
    }

    fn server_error() -> ResilienceError {
        ResilienceError::ExternalService {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_delay_schedule_without_jitter() {
        let p = policy(no_jitter());
        let ms: Vec<u64> = (0..6).map(|a| p.calculate_delay(a, None).as_millis() as u64).collect();
        assert_eq!(ms, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let p = policy(no_jitter());
        let err = ResilienceError::RateLimited { retry_after_secs: 60, status: 429 };
        assert_eq!(p.calculate_delay(0, Some(&err)), Duration::from_millis(60_000));
        assert_eq!(p.calculate_delay(4, Some(&err)), Duration::from_millis(60_000));
    }

    #[test]
    fn test_should_retry_rules() {
        let p = policy(RetryPolicyConfig {
            max_retries: 2,
            ..Default::default()
        });
        assert!(p.should_retry(&server_error(), 0));
        assert!(p.should_retry(&ResilienceError::Timeout { timeout_ms: 1 }, 1));
        assert!(!p.should_retry(&server_error(), 2));
        assert!(!p.should_retry(&ResilienceError::Validation("bad".into()), 0));
        assert!(!p.should_retry(
            &ResilienceError::ExternalService { status: 401, message: String::new() },
            0
        ));

        let only_rate_limits = policy(RetryPolicyConfig::rate_limit());
        assert!(!only_rate_limits.should_retry(&ResilienceError::Network("reset".into()), 0));
        assert!(only_rate_limits.should_retry(&server_error(), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_then_succeeds_in_order() {
        let p = policy(no_jitter());
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let res = p
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_aggregate() {
        let p = policy(RetryPolicyConfig {
            max_retries: 2,
            ..no_jitter()
        });
        let calls = AtomicU32::new(0);

        let res: Result<()> = p
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;

        match res {
            Err(ResilienceError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status_code(), Some(503));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_is_reraised_immediately() {
        let p = policy(no_jitter());
        let calls = AtomicU32::new(0);
        let res: Result<()> = p
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::Validation("missing model".into()))
            })
            .await;
        assert!(matches!(res, Err(ResilienceError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_named_and_adhoc() {
        let mgr = RetryManager::with_defaults(EventBus::new());
        assert_eq!(
            mgr.policy_names(),
            vec!["api", "conservative", "external", "fast", "rate-limit"]
        );
        assert_eq!(mgr.get_policy("fast").unwrap().config().max_retries, 2);

        let unknown: Result<()> = mgr.execute_with_policy("nope", || async { Ok(()) }).await;
        assert!(matches!(unknown, Err(ResilienceError::Validation(_))));

        let calls = AtomicU32::new(0);
        let res: Result<()> = mgr
            .execute(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::Network("reset".into()))
                },
                RetryOverrides {
                    max_retries: Some(1),
                    initial_delay_ms: Some(10),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(res, Err(ResilienceError::RetryExhausted { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
