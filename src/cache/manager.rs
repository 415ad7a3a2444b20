//! Dual-tier cache manager.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::entry::CacheEntry;
use crate::cache::keys::KeyBuilder;
use crate::cache::local::LocalCache;
use crate::cache::policy::TtlPolicy;
use crate::cache::remote::RemoteStore;
use crate::cache::strategy::{Tier, TierStrategy};
use crate::config::schema::CacheConfig;
use crate::error::{ErrorKind, ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::{EventBus, ResilienceEvent};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::timeouts::with_timeout;

/// Name of the breaker guarding the remote tier.
pub const REMOTE_BREAKER: &str = "cache-remote";

/// A cached entry and the tier that served it.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: CacheEntry,
    pub tier: Tier,
}

/// Keys removed from each tier by a clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub local: usize,
    /// `None` when the remote tier is disabled or could not be reached.
    pub remote: Option<usize>,
}

/// Cache counters at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
    pub local_size: usize,
    pub local_capacity: usize,
    pub local_evictions: u64,
    pub remote_enabled: bool,
    pub remote_state: Option<CircuitState>,
}

#[derive(Debug, Default)]
struct CacheStats {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

/// Local-first cache backed by an optional shared remote store.
///
/// Remote failures never reach the caller: they are counted, logged, and the
/// operation falls back to the local tier.
#[derive(Debug)]
pub struct CacheManager {
    keys: KeyBuilder,
    ttl: ArcSwap<TtlPolicy>,
    local: LocalCache,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_breaker: CircuitBreaker,
    remote_timeout: Duration,
    strategy: TierStrategy,
    stats: CacheStats,
    events: EventBus,
}

impl CacheManager {
    pub fn new(config: &CacheConfig, remote: Option<Arc<dyn RemoteStore>>, events: EventBus) -> Self {
        let remote = remote.filter(|_| config.remote_enabled);
        let strategy = if remote.is_some() {
            TierStrategy::two_tier()
        } else {
            TierStrategy::local_only()
        };
        Self {
            keys: KeyBuilder::new(config.key_prefix.clone(), config.max_key_length),
            ttl: ArcSwap::from_pointee(TtlPolicy::from(config)),
            local: LocalCache::new(config.local_capacity, Duration::from_secs(config.local_max_age_secs)),
            remote,
            remote_breaker: CircuitBreaker::new(
                REMOTE_BREAKER,
                CircuitBreakerConfig::from(&config.remote_breaker),
                events.clone(),
            ),
            remote_timeout: Duration::from_millis(config.remote_timeout_ms),
            strategy,
            stats: CacheStats::default(),
            events,
        }
    }

    /// Local tier first, then remote. A remote hit is copied into the local tier.
    pub async fn lookup(&self, key: &str, content_type: &str) -> Option<CacheHit> {
        let storage_key = self.keys.build(content_type, key);
        match self.find(&storage_key).await {
            Some(hit) => {
                self.record_hit(&storage_key, hit.tier);
                Some(hit)
            }
            None => {
                self.record_miss(storage_key);
                None
            }
        }
    }

    /// Typed read. A payload that no longer deserializes is reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, content_type: &str) -> Option<T> {
        let storage_key = self.keys.build(content_type, key);
        let Some(hit) = self.find(&storage_key).await else {
            self.record_miss(storage_key);
            return None;
        };
        match serde_json::from_value(hit.entry.payload) {
            Ok(value) => {
                self.record_hit(&storage_key, hit.tier);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %storage_key, error = %e, "Cached payload has unexpected shape");
                self.record_miss(storage_key);
                None
            }
        }
    }

    /// Write to every tier. `ttl` overrides the per-type default.
    ///
    /// Only a non-serializable value is an error; remote write failures degrade
    /// to local-only caching.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        content_type: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = serde_json::to_value(value)
            .map_err(|e| ResilienceError::Validation(format!("value is not serializable: {}", e)))?;
        let ttl = ttl.unwrap_or_else(|| self.get_ttl(content_type));
        let entry = CacheEntry::new(self.keys.build(content_type, key), payload, content_type, ttl);

        for tier in self.strategy.write_order() {
            match tier {
                Tier::Remote => {
                    let bytes = serde_json::to_vec(&entry)
                        .map_err(|e| ResilienceError::Internal(e.to_string()))?;
                    let storage_key = entry.key.clone();
                    self.remote_call("set", move |store| async move {
                        store.set(&storage_key, bytes, ttl).await
                    })
                    .await;
                }
                Tier::Local => {
                    self.local.insert(entry.clone(), ttl);
                }
            }
        }

        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_write(content_type);
        metrics::record_cache_size(self.local.len());
        tracing::debug!(key = %entry.key, ttl_ms = ttl.as_millis() as u64, "Cached value");
        Ok(())
    }

    /// Remove from both tiers. Returns true when either tier held the key.
    pub async fn delete(&self, key: &str, content_type: &str) -> bool {
        let storage_key = self.keys.build(content_type, key);
        let local = self.local.remove(&storage_key);
        let sk = storage_key.clone();
        let remote = self
            .remote_call("delete", move |store| async move { store.delete(&sk).await })
            .await
            .unwrap_or(false);

        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_delete();
        metrics::record_cache_size(self.local.len());
        local || remote
    }

    pub async fn exists(&self, key: &str, content_type: &str) -> bool {
        let storage_key = self.keys.build(content_type, key);
        if self.local.contains(&storage_key) {
            return true;
        }
        self.remote_call("exists", move |store| async move { store.exists(&storage_key).await })
            .await
            .unwrap_or(false)
    }

    /// Remove keys matching `pattern` (glob over the caller key) within
    /// `content_type`. With neither given, both tiers are emptied of this
    /// cache's namespace.
    pub async fn clear(&self, pattern: Option<&str>, content_type: Option<&str>) -> ClearOutcome {
        let outcome = if pattern.is_none() && content_type.is_none() {
            let local = self.local.clear();
            let glob = format!("{}:*", self.keys.prefix());
            let remote = self
                .remote_call("clear", move |store| async move { store.delete_matching(&glob).await })
                .await;
            ClearOutcome { local, remote }
        } else {
            let glob = self.keys.pattern(content_type, pattern);
            let local = self.local.remove_matching(&glob);
            let remote = self
                .remote_call("clear", move |store| async move { store.delete_matching(&glob).await })
                .await;
            ClearOutcome { local, remote }
        };

        metrics::record_cache_size(self.local.len());
        tracing::info!(
            pattern = pattern.unwrap_or("*"),
            content_type = content_type.unwrap_or("*"),
            local = outcome.local,
            remote = ?outcome.remote,
            "Cache cleared"
        );
        outcome
    }

    /// Configured TTL for a content type, or the global default.
    pub fn get_ttl(&self, content_type: &str) -> Duration {
        self.ttl.load().ttl_for(content_type)
    }

    /// Replace the TTL table. Existing entries keep the TTL they were written with.
    pub fn set_ttl_policy(&self, policy: TtlPolicy) {
        self.ttl.store(Arc::new(policy));
    }

    /// Drop expired entries from the local tier. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let purged = self.local.purge_expired();
        if purged > 0 {
            metrics::record_cache_size(self.local.len());
            tracing::debug!(purged, "Swept expired local entries");
        }
        purged
    }

    pub fn metrics(&self) -> CacheMetrics {
        let local_hits = self.stats.local_hits.load(Ordering::Relaxed);
        let remote_hits = self.stats.remote_hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let hits = local_hits + remote_hits;
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        CacheMetrics {
            hits,
            misses,
            hit_rate,
            local_hits,
            remote_hits,
            writes: self.stats.writes.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            local_size: self.local.len(),
            local_capacity: self.local.capacity(),
            local_evictions: self.local.evictions(),
            remote_enabled: self.remote.is_some(),
            remote_state: self.remote_state(),
        }
    }

    /// Probe the remote tier. False when disabled, open, or failing.
    pub async fn remote_reachable(&self) -> bool {
        self.remote_call("ping", |store| async move { store.ping().await })
            .await
            .is_some()
    }

    /// State of the remote-tier breaker, `None` when there is no remote tier.
    pub fn remote_state(&self) -> Option<CircuitState> {
        self.remote.as_ref().map(|_| self.remote_breaker.state())
    }

    pub fn remote_breaker(&self) -> &CircuitBreaker {
        &self.remote_breaker
    }

    async fn find(&self, storage_key: &str) -> Option<CacheHit> {
        for tier in self.strategy.read_order() {
            let found = match tier {
                Tier::Local => self.local.get(storage_key),
                Tier::Remote => self.remote_get(storage_key).await,
            };
            if let Some(entry) = found {
                for target in self.strategy.backfill_targets(*tier) {
                    if *target == Tier::Local {
                        self.local.insert(entry.clone(), entry.remaining_ttl());
                    }
                }
                return Some(CacheHit { entry, tier: *tier });
            }
        }
        None
    }

    fn record_miss(&self, storage_key: String) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup("none", false);
        tracing::debug!(key = %storage_key, "Cache miss");
        self.events.publish(ResilienceEvent::CacheMiss { key: storage_key });
    }

    fn record_hit(&self, storage_key: &str, tier: Tier) {
        match tier {
            Tier::Local => self.stats.local_hits.fetch_add(1, Ordering::Relaxed),
            Tier::Remote => self.stats.remote_hits.fetch_add(1, Ordering::Relaxed),
        };
        metrics::record_cache_lookup(tier.as_str(), true);
        tracing::debug!(key = %storage_key, tier = tier.as_str(), "Cache hit");
        self.events.publish(ResilienceEvent::CacheHit {
            key: storage_key.to_string(),
            tier,
        });
    }

    async fn remote_get(&self, storage_key: &str) -> Option<CacheEntry> {
        let key = storage_key.to_string();
        let bytes = self
            .remote_call("get", move |store| async move { store.get(&key).await })
            .await
            .flatten()?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                self.note_error("get", &ResilienceError::Internal(format!("corrupt entry: {}", e)));
                None
            }
        }
    }

    /// Run a remote-store operation behind the tier's breaker and deadline.
    ///
    /// Returns `None` when there is no remote tier or the operation failed.
    async fn remote_call<T, F, Fut>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.remote.as_ref()?.clone();
        let limit = self.remote_timeout;
        match self
            .remote_breaker
            .execute(|| with_timeout(limit, f(store)))
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                self.note_error(op, &e);
                None
            }
        }
    }

    fn note_error(&self, op: &'static str, err: &ResilienceError) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_error(op);
        if err.kind() == ErrorKind::CircuitOpen {
            tracing::debug!(op, "Remote cache tier bypassed, circuit open");
        } else {
            tracing::warn!(op, error = %err, "Remote cache operation failed, using local tier");
        }
        self.events.publish(ResilienceEvent::CacheError {
            op,
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::MemoryStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl RemoteStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
            Err(ResilienceError::Network("connection refused".into()))
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Duration) -> Result<()> {
            Err(ResilienceError::Network("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Err(ResilienceError::Network("connection refused".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            Err(ResilienceError::Network("connection refused".into()))
        }
        async fn delete_matching(&self, _: &str) -> Result<usize> {
            Err(ResilienceError::Network("connection refused".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(ResilienceError::Network("connection refused".into()))
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Answer {
        content: String,
        tokens: u32,
    }

    fn manager_with(store: Option<Arc<dyn RemoteStore>>) -> CacheManager {
        CacheManager::new(&CacheConfig::default(), store, EventBus::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_then_expire() {
        let cache = manager_with(Some(Arc::new(MemoryStore::default())));
        let value = Answer { content: "hi".into(), tokens: 3 };

        cache
            .set("q1", &value, "completion", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(cache.get::<Answer>("q1", "completion").await, Some(value));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cache.get::<Answer>("q1", "completion").await, None);
    }

    #[tokio::test]
    async fn test_remote_hit_backfills_local() {
        let store = Arc::new(MemoryStore::default());
        let writer = manager_with(Some(store.clone()));
        let reader = manager_with(Some(store));

        writer.set("shared", &json!({"v": 1}), "config", None).await.unwrap();

        let first = reader.lookup("shared", "config").await.unwrap();
        assert_eq!(first.tier, Tier::Remote);
        let second = reader.lookup("shared", "config").await.unwrap();
        assert_eq!(second.tier, Tier::Local);
        assert_eq!(second.entry.payload, json!({"v": 1}));

        let m = reader.metrics();
        assert_eq!((m.local_hits, m.remote_hits), (1, 1));
    }

    #[tokio::test]
    async fn test_pattern_clear_leaves_unrelated_keys() {
        let store = Arc::new(MemoryStore::default());
        let cache = manager_with(Some(store.clone()));
        for key in ["prefix_1", "prefix_2", "other"] {
            cache.set(key, &key, "template", None).await.unwrap();
        }

        let outcome = cache.clear(Some("prefix_*"), None).await;
        assert_eq!(outcome, ClearOutcome { local: 2, remote: Some(2) });
        assert!(!cache.exists("prefix_1", "template").await);
        assert!(cache.exists("other", "template").await);
        assert_eq!(store.len(), 1);

        let outcome = cache.clear(None, None).await;
        assert_eq!(outcome.local, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_hit_rate_is_exact() {
        let cache = manager_with(None);
        cache.set("a", &1, "config", None).await.unwrap();

        for _ in 0..3 {
            assert!(cache.get::<i32>("a", "config").await.is_some());
        }
        assert!(cache.get::<i32>("missing", "config").await.is_none());

        let m = cache.metrics();
        assert_eq!(m.hits, 3);
        assert_eq!(m.misses, 1);
        assert_eq!(m.hit_rate, 0.75);
        assert!(!m.remote_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_frees_local_slots() {
        let cache = manager_with(None);
        cache.set("short", &1, "config", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", &2, "config", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(cache.metrics().local_size, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.metrics().local_size, 1);
        assert_eq!(cache.get::<i32>("long", "config").await, Some(2));
    }

    #[tokio::test]
    async fn test_undecodable_payload_counts_as_miss() {
        let cache = manager_with(None);
        cache.set("k", &"text", "config", None).await.unwrap();

        assert!(cache.get::<u32>("k", "config").await.is_none());
        assert_eq!(cache.get::<String>("k", "config").await.as_deref(), Some("text"));

        let m = cache.metrics();
        assert_eq!(m.hits, 1);
        assert_eq!(m.local_hits, 1);
        assert_eq!(m.misses, 1);
        assert_eq!(m.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_remote_outage_degrades_to_local() {
        let cache = manager_with(Some(Arc::new(DownStore)));
        cache.set("k", &"v", "config", None).await.unwrap();

        assert_eq!(cache.get::<String>("k", "config").await.as_deref(), Some("v"));
        assert!(cache.delete("k", "config").await);
        assert!(cache.get::<String>("nope", "config").await.is_none());
        assert!(cache.metrics().errors >= 3);

        // Three consecutive failures trip the remote breaker.
        assert_eq!(cache.remote_state(), Some(CircuitState::Open));
        assert!(!cache.remote_reachable().await);
    }

    #[tokio::test]
    async fn test_long_keys_are_hashed_and_still_readable() {
        let cache = manager_with(None);
        let long_key = "x".repeat(400);
        cache.set(&long_key, &42, "completion", None).await.unwrap();

        let hit = cache.lookup(&long_key, "completion").await.unwrap();
        assert!(hit.entry.key.len() < 250);
        assert!(hit.entry.key.starts_with("guard:completion:#"));
    }

    #[test]
    fn test_ttl_lookup_and_replace() {
        let cache = manager_with(None);
        assert_eq!(cache.get_ttl("completion"), Duration::from_secs(3600));
        assert_eq!(cache.get_ttl("unknown"), Duration::from_secs(600));

        cache.set_ttl_policy(TtlPolicy::new(Duration::from_secs(5)));
        assert_eq!(cache.get_ttl("completion"), Duration::from_secs(5));
    }
}
