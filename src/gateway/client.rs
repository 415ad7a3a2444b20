//! Composed resilient client.
//!
//! Wires cache, coalescing, retries, service breakers and the pool into the
//! single call path used for completion requests.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::keys::fingerprint;
use crate::cache::manager::{CacheManager, CacheMetrics};
use crate::cache::policy::TtlPolicy;
use crate::cache::remote::RemoteStore;
use crate::config::schema::{GuardConfig, Pricing, ServiceConfig};
use crate::error::Result;
use crate::gateway::coalesce::Coalescer;
use crate::gateway::completion::{cost, parse_completion, CompletionCall, CompletionOutcome};
use crate::health::{assess, HealthReport, HostHealth, RemoteCacheHealth};
use crate::observability::EventBus;
use crate::pool::manager::{ConnectionPoolManager, PoolMetrics, PoolSettings};
use crate::pool::transport::Connector;
use crate::resilience::breaker_manager::{BreakerHealthReport, CircuitBreakerManager};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retries::{RetryManager, RetryPolicyConfig};

#[derive(Debug, Clone, Default)]
struct ServiceTable {
    default_policy: String,
    services: HashMap<String, ServiceConfig>,
}

impl ServiceTable {
    fn from_config(config: &GuardConfig) -> Self {
        Self {
            default_policy: config.retry.default_policy.clone(),
            services: config.services.clone(),
        }
    }

    fn policy_for(&self, service: &str) -> String {
        self.services
            .get(service)
            .and_then(|s| s.retry_policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    fn pricing_for(&self, service: &str) -> Option<Pricing> {
        self.services.get(service).and_then(|s| s.pricing)
    }
}

/// Operational snapshot of every component.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub cache: CacheMetrics,
    pub breakers: BreakerHealthReport,
    pub pool: PoolMetrics,
    pub retry_policies: Vec<String>,
    pub coalesced_requests: u64,
    pub uptime_secs: u64,
}

/// Resilient entry point for outbound completion calls.
#[derive(Debug)]
pub struct ResilientClient {
    cache: CacheManager,
    breakers: CircuitBreakerManager,
    retries: RetryManager,
    pool: ConnectionPoolManager,
    coalescer: Coalescer<CompletionOutcome>,
    services: ArcSwap<ServiceTable>,
    events: EventBus,
    started_at: Instant,
}

impl ResilientClient {
    pub fn new(
        config: &GuardConfig,
        connector: Arc<dyn Connector>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        let events = EventBus::new();
        let (default, overrides) = breaker_configs(config);

        let retries = RetryManager::with_defaults(events.clone());
        for (name, policy) in &config.retry.policies {
            retries.register_policy(name, policy.clone());
        }

        Self {
            cache: CacheManager::new(&config.cache, remote, events.clone()),
            breakers: CircuitBreakerManager::new(default, overrides, events.clone()),
            retries,
            pool: ConnectionPoolManager::new(PoolSettings::from(&config.pool), connector, events.clone()),
            coalescer: Coalescer::new(events.clone()),
            services: ArcSwap::from_pointee(ServiceTable::from_config(config)),
            events,
            started_at: Instant::now(),
        }
    }

    /// Serve from cache, or call the provider once per distinct in-flight request.
    ///
    /// ```text
    /// cache → coalesce → retry policy → service breaker → pool → cache write
    /// ```
    pub async fn complete(&self, call: CompletionCall) -> Result<CompletionOutcome> {
        if call.bypass_cache {
            return self.fetch(&call).await;
        }

        let key = match &call.cache_key {
            Some(key) => key.clone(),
            None => fingerprint(&(&call.service, call.url.as_str(), &call.payload))?,
        };

        if let Some(mut hit) = self.cache.get::<CompletionOutcome>(&key, &call.content_type).await {
            hit.cached = true;
            return Ok(hit);
        }

        let flight = format!("{}:{}", call.content_type, key);
        let (call, key) = (&call, &key);
        self.coalescer
            .run(&flight, move || async move {
                let outcome = self.fetch(call).await?;
                if let Err(e) = self.cache.set(key, &outcome, &call.content_type, call.ttl).await {
                    tracing::warn!(service = %call.service, error = %e, "Failed to cache completion");
                }
                Ok(outcome)
            })
            .await
    }

    async fn fetch(&self, call: &CompletionCall) -> Result<CompletionOutcome> {
        let (policy, pricing) = {
            let table = self.services.load();
            (table.policy_for(&call.service), table.pricing_for(&call.service))
        };

        let (content, usage) = self
            .retries
            .execute_with_policy(&policy, move || async move {
                self.breakers
                    .execute(&call.service, move || async move {
                        let response = self.pool.request(call.to_request()).await?;
                        parse_completion(&response.json()?)
                    })
                    .await
            })
            .await?;

        tracing::debug!(
            service = %call.service,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Completion received"
        );
        Ok(CompletionOutcome {
            content,
            cost: pricing.map(|p| cost(&p, &usage)),
            usage,
            cached: false,
        })
    }

    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            cache: self.cache.metrics(),
            breakers: self.breakers.health_status(),
            pool: self.pool.metrics(),
            retry_policies: self.retries.policy_names(),
            coalesced_requests: self.coalescer.coalesced(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Aggregate verdict for liveness and readiness probes.
    pub async fn health_check(&self) -> HealthReport {
        let services = self.breakers.health_status();
        let pool = self.pool.metrics();
        let hosts: Vec<HostHealth> = pool
            .hosts
            .iter()
            .map(|h| HostHealth {
                host: h.host.clone(),
                state: h.breaker.state,
            })
            .collect();
        let remote_cache = match self.cache.remote_state() {
            Some(_) => {
                let reachable = self.cache.remote_reachable().await;
                self.cache.remote_state().map(|state| RemoteCacheHealth { reachable, state })
            }
            None => None,
        };

        HealthReport {
            status: assess(&services, &hosts, remote_cache.as_ref(), pool.closed),
            services,
            hosts,
            remote_cache,
            pool_closed: pool.closed,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Force every breaker (services, hosts, remote cache) back to Closed.
    pub fn reset_breakers(&self) {
        self.breakers.reset_all();
        self.pool.reset_breakers();
        self.cache.remote_breaker().reset();
    }

    /// Adopt a reloaded configuration.
    ///
    /// TTLs, breaker thresholds, retry policies and service settings change in
    /// place; pool limits keep their startup values.
    pub fn apply_config(&self, config: &GuardConfig) {
        self.cache.set_ttl_policy(TtlPolicy::from(&config.cache));

        let (default, overrides) = breaker_configs(config);
        self.breakers.update_config(default, overrides);

        for (name, policy) in RetryPolicyConfig::builtin().into_iter().chain(config.retry.policies.clone()) {
            self.retries.register_policy(&name, policy);
        }

        self.services.store(Arc::new(ServiceTable::from_config(config)));
        tracing::info!(
            services = config.services.len(),
            policies = self.retries.policy_names().len(),
            "Applied configuration update"
        );
    }

    /// Flush pending batches and wait for in-flight calls.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn retries(&self) -> &RetryManager {
        &self.retries
    }

    pub fn pool(&self) -> &ConnectionPoolManager {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

fn breaker_configs(config: &GuardConfig) -> (CircuitBreakerConfig, HashMap<String, CircuitBreakerConfig>) {
    let default = CircuitBreakerConfig::from(&config.breakers.default);
    let overrides = config
        .breakers
        .services
        .iter()
        .map(|(name, settings)| (name.clone(), CircuitBreakerConfig::from(settings)))
        .collect();
    (default, overrides)
}
