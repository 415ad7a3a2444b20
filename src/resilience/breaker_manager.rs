//! Registry of circuit breakers keyed by dependency name.
//!
//! # Responsibilities
//! - Create breakers lazily on first reference
//! - Apply default or per-service configuration
//! - Aggregate per-breaker health for probes

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::Result;
use crate::observability::EventBus;
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};

#[derive(Debug, Clone, Default)]
struct RegistryConfig {
    default: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
}

impl RegistryConfig {
    fn for_name(&self, name: &str) -> CircuitBreakerConfig {
        self.overrides.get(name).cloned().unwrap_or_else(|| self.default.clone())
    }
}

/// Health of a single breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub state: CircuitState,
    pub is_healthy: bool,
    pub metrics: BreakerMetrics,
}

/// Health of every registered breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealthReport {
    /// False when any breaker is open.
    pub healthy: bool,
    pub breakers: BTreeMap<String, BreakerHealth>,
}

impl BreakerHealthReport {
    pub fn any_in_state(&self, state: CircuitState) -> bool {
        self.breakers.values().any(|b| b.state == state)
    }
}

/// Owns one breaker per dependency name.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: ArcSwap<RegistryConfig>,
    events: EventBus,
}

impl CircuitBreakerManager {
    pub fn new(
        default: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
        events: EventBus,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            config: ArcSwap::from_pointee(RegistryConfig { default, overrides }),
            events,
        }
    }

    /// Look up or create the breaker for `name`.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    name,
                    self.config.load().for_name(name),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Run `f` through the breaker registered under `name`.
    pub async fn execute<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(name);
        breaker.execute(f).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn health_status(&self) -> BreakerHealthReport {
        let breakers: BTreeMap<String, BreakerHealth> = self
            .breakers
            .iter()
            .map(|entry| {
                let metrics = entry.value().metrics();
                let health = BreakerHealth {
                    state: metrics.state,
                    is_healthy: metrics.state != CircuitState::Open,
                    metrics,
                };
                (entry.key().clone(), health)
            })
            .collect();
        BreakerHealthReport {
            healthy: breakers.values().all(|b| b.is_healthy),
            breakers,
        }
    }

    /// Force every breaker back to Closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Reset one breaker. Returns false if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    /// Replace default and per-service configuration; existing breakers adopt it.
    pub fn update_config(
        &self,
        default: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) {
        let config = RegistryConfig { default, overrides };
        for entry in self.breakers.iter() {
            entry.value().reconfigure(config.for_name(entry.key()));
        }
        self.config.store(Arc::new(config));
    }
}
