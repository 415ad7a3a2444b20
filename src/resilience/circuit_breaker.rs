//! Circuit breaker for upstream dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls test whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency name, one mutex per breaker
//! - The lock is never held across the wrapped call
//! - Each reopening grows the open timeout until it is capped
//! - Validation errors are caller mistakes and do not count as failures

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::schema::BreakerSettings;
use crate::error::{ErrorKind, ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::{EventBus, ResilienceEvent};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and timing for a single breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening.
    pub failure_threshold: u32,
    /// Consecutive Half-Open successes before closing.
    pub success_threshold: u32,
    /// Base time spent Open before a probe is admitted.
    pub timeout: Duration,
    /// Upper bound for the grown open timeout.
    pub max_timeout: Duration,
    /// Growth factor applied to the open timeout on every reopening.
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            success_threshold: s.success_threshold,
            timeout: Duration::from_millis(s.timeout_ms),
            max_timeout: Duration::from_millis(s.max_timeout_ms.max(s.timeout_ms)),
            backoff_multiplier: s.backoff_multiplier,
        }
    }
}

/// Point-in-time view of a breaker, suitable for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected: u64,
    pub times_opened: u64,
    /// Milliseconds until an open breaker admits a probe (0 when not open).
    pub next_attempt_in_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    current_timeout: Duration,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    rejected: u64,
    times_opened: u64,
}

/// Failure-tracking guard around calls to one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: ArcSwap<CircuitBreakerConfig>,
    inner: Mutex<BreakerInner>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, events: EventBus) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed);
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
                current_timeout: config.timeout,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                rejected: 0,
                times_opened: 0,
            }),
            config: ArcSwap::from_pointee(config),
            name,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Adopt new thresholds. Current state and counters are kept.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config));
    }

    /// Current state without triggering the Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `f` through the breaker.
    ///
    /// An open breaker rejects with [`ResilienceError::CircuitOpen`] and never
    /// invokes `f`. Errors from `f` are returned unchanged after being recorded.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.kind() == ErrorKind::Validation {
                    self.record_neutral();
                } else {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }

    /// Fail fast if the breaker is open and its timeout has not elapsed.
    ///
    /// A rejection is counted, but an admitted check is not a request and
    /// never transitions state.
    pub fn check(&self) -> Result<()> {
        let inner = self.lock();
        let (state, next_attempt_at) = (inner.state, inner.next_attempt_at);
        match (state, next_attempt_at) {
            (CircuitState::Open, Some(at)) if Instant::now() < at => Err(self.reject(inner, at)),
            _ => Ok(()),
        }
    }

    /// Admit a call, moving Open → Half-Open once the timeout has elapsed.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let now = Instant::now();
            let next_attempt_at = inner.next_attempt_at;
            match next_attempt_at {
                Some(at) if now < at => return Err(self.reject(inner, at)),
                _ => {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    self.transition(&mut inner, CircuitState::HalfOpen);
                }
            }
        }
        inner.total_requests += 1;
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.success_count += 1;
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.load().success_threshold {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    inner.current_timeout = self.config.load().timeout;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A call admitted before another one tripped the breaker.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.success_count = 0;
                if inner.failure_count >= self.config.load().failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.trip(&mut inner),
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to Closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.next_attempt_at = None;
        inner.current_timeout = self.config.load().timeout;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        let next_attempt_in_ms = match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(at)) => {
                at.saturating_duration_since(Instant::now()).as_millis() as u64
            }
            _ => 0,
        };
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected: inner.rejected,
            times_opened: inner.times_opened,
            next_attempt_in_ms,
        }
    }

    fn record_neutral(&self) {
        self.lock().total_requests -= 1;
    }

    fn trip(&self, inner: &mut BreakerInner) {
        let config = self.config.load();
        let timeout = inner.current_timeout;
        inner.next_attempt_at = Some(Instant::now() + timeout);
        inner.success_count = 0;
        inner.times_opened += 1;
        inner.current_timeout = grow_timeout(timeout, &config);
        self.transition(inner, CircuitState::Open);
        tracing::warn!(
            breaker = %self.name,
            open_for_ms = timeout.as_millis() as u64,
            times_opened = inner.times_opened,
            "Circuit opened"
        );
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state transition");
        metrics::record_breaker_transition(&self.name, to);
        self.events.publish(ResilienceEvent::BreakerTransition {
            name: self.name.clone(),
            from,
            to,
        });
    }

    fn reject(&self, mut inner: MutexGuard<'_, BreakerInner>, at: Instant) -> ResilienceError {
        inner.rejected += 1;
        let err = self.open_error(&inner, at);
        drop(inner);
        tracing::debug!(breaker = %self.name, "Circuit open, rejecting call");
        metrics::record_breaker_rejection(&self.name);
        self.events.publish(ResilienceEvent::BreakerRejected {
            name: self.name.clone(),
        });
        err
    }

    fn open_error(&self, inner: &BreakerInner, at: Instant) -> ResilienceError {
        ResilienceError::CircuitOpen {
            name: self.name.clone(),
            state: inner.state,
            retry_in_ms: at.saturating_duration_since(Instant::now()).as_millis() as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State is plain counters; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Next open timeout after a reopen, capped at `max_timeout`.
///
/// Grown in f64 seconds so an extreme multiplier saturates at the cap.
fn grow_timeout(timeout: Duration, config: &CircuitBreakerConfig) -> Duration {
    let cap = config.max_timeout.max(config.timeout);
    let grown = timeout.as_secs_f64() * config.backoff_multiplier.max(1.0);
    if grown.is_finite() && grown < cap.as_secs_f64() {
        Duration::from_secs_f64(grown)
    } else {
        cap
    }
}
