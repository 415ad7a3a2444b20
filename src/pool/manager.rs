//! Host-aware connection pool with request batching.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::schema::PoolConfig;
use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::{EventBus, ResilienceEvent};
use crate::pool::batcher::{batch_key, BatchMember, PendingBatch};
use crate::pool::host::{HostEntry, HostMetrics};
use crate::pool::transport::{classify_response, host_key, Connector, RequestDescriptor, UpstreamResponse};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::timeouts::with_timeout;

/// Limits fixed at pool construction.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_sockets_per_host: usize,
    pub request_timeout: Duration,
    pub batching_enabled: bool,
    pub batch_max_size: usize,
    pub batch_window: Duration,
    pub host_breaker: CircuitBreakerConfig,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_sockets_per_host: config.max_sockets_per_host,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            batching_enabled: config.batching_enabled,
            batch_max_size: config.batch_max_size.max(1),
            batch_window: Duration::from_millis(config.batch_window_ms),
            host_breaker: CircuitBreakerConfig::from(&config.host_breaker),
        }
    }
}

/// Pool-wide counters and per-host breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub total_requests: u64,
    pub batched_requests: u64,
    pub closed: bool,
    pub hosts: Vec<HostMetrics>,
}

#[derive(Debug)]
struct PoolInner {
    hosts: DashMap<String, Arc<HostEntry>>,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    events: EventBus,
    total_requests: AtomicU64,
    batched_requests: AtomicU64,
    closed: AtomicBool,
}

/// Issues outbound requests over per-host pooled connections.
///
/// Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct ConnectionPoolManager {
    inner: Arc<PoolInner>,
}

impl ConnectionPoolManager {
    pub fn new(settings: PoolSettings, connector: Arc<dyn Connector>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                hosts: DashMap::new(),
                connector,
                settings,
                events,
                total_requests: AtomicU64::new(0),
                batched_requests: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Send one request.
    ///
    /// Fails fast when the host's breaker is open. Non-batchable requests are
    /// dispatched at once. Batchable requests join the host's open batch (or
    /// open one) and are dispatched when it fills or its window ends, so a lone
    /// batchable request waits out the full window. Every member receives its
    /// own result.
    pub async fn request(&self, request: RequestDescriptor) -> Result<UpstreamResponse> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ResilienceError::PoolClosed);
        }
        let host = self.inner.host(&request)?;
        host.breaker().check()?;
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);

        let key = match batch_key(&request) {
            Some(key) if self.inner.settings.batching_enabled => key,
            _ => return self.inner.dispatch(&host, request).await,
        };

        let (tx, rx) = oneshot::channel();
        let member = BatchMember { request, reply: tx };
        if let Some(full) = self.inner.enqueue(&host, key, member) {
            let inner = self.inner.clone();
            let host = host.clone();
            tokio::spawn(async move { inner.dispatch_batch(host, full).await });
        }

        rx.await
            .map_err(|_| ResilienceError::Internal("batch dropped before completion".into()))?
    }

    pub fn metrics(&self) -> PoolMetrics {
        let mut hosts: Vec<HostMetrics> = self.inner.hosts.iter().map(|e| e.value().metrics()).collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        PoolMetrics {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            batched_requests: self.inner.batched_requests.load(Ordering::Relaxed),
            closed: self.inner.closed.load(Ordering::Acquire),
            hosts,
        }
    }

    pub fn host(&self, key: &str) -> Option<Arc<HostEntry>> {
        self.inner.hosts.get(key).map(|h| h.clone())
    }

    /// Force every host breaker back to Closed.
    pub fn reset_breakers(&self) {
        for entry in self.inner.hosts.iter() {
            entry.value().breaker().reset();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting requests, dispatch pending batches and wait for in-flight calls.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hosts: Vec<Arc<HostEntry>> = self.inner.hosts.iter().map(|e| e.value().clone()).collect();
        tracing::info!(hosts = hosts.len(), "Closing connection pool");

        for host in &hosts {
            let batches = host.take_all_batches();
            join_all(batches.into_iter().map(|b| self.inner.clone().dispatch_batch(host.clone(), b))).await;
        }
        join_all(hosts.iter().map(|h| h.drain())).await;

        self.inner.hosts.clear();
        tracing::info!("Connection pool closed");
    }
}

impl PoolInner {
    fn host(&self, request: &RequestDescriptor) -> Result<Arc<HostEntry>> {
        let key = host_key(&request.url)?;
        if let Some(existing) = self.hosts.get(&key) {
            return Ok(existing.clone());
        }
        let connection = self.connector.connect(&key)?;
        let entry = self
            .hosts
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(host = %key, "Registering pooled host");
                Arc::new(HostEntry::new(
                    key.clone(),
                    connection,
                    self.settings.max_sockets_per_host,
                    self.settings.host_breaker.clone(),
                    self.events.clone(),
                ))
            })
            .clone();
        Ok(entry)
    }

    /// Add `member` to the host's open batch. Returns the batch when it is full.
    fn enqueue(self: &Arc<Self>, host: &Arc<HostEntry>, key: String, member: BatchMember) -> Option<PendingBatch> {
        let max = self.settings.batch_max_size;
        let mut pending = host.pending();

        if let Some(batch) = pending.get_mut(&key) {
            batch.push(member);
            return if batch.is_full(max) { pending.remove(&key) } else { None };
        }

        let mut batch = PendingBatch::new();
        batch.push(member);
        if batch.is_full(max) {
            return Some(batch);
        }

        let id = batch.id;
        pending.insert(key.clone(), batch);
        drop(pending);

        let inner = self.clone();
        let host = host.clone();
        let window = self.settings.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(batch) = host.take_batch(&key, id) {
                inner.dispatch_batch(host, batch).await;
            }
        });
        None
    }

    async fn dispatch_batch(self: Arc<Self>, host: Arc<HostEntry>, batch: PendingBatch) {
        let size = batch.len();
        if size > 1 {
            self.batched_requests.fetch_add(size as u64, Ordering::Relaxed);
            host.record_batched(size);
            metrics::record_pool_batched(host.key(), size);
        }
        tracing::debug!(
            host = %host.key(),
            batch_id = %batch.id,
            size,
            waited_ms = batch.opened_at.elapsed().as_millis() as u64,
            "Dispatching batch"
        );
        self.events.publish(ResilienceEvent::BatchDispatched {
            host: host.key().to_string(),
            size,
        });

        join_all(batch.members.into_iter().map(|member| {
            let host = host.clone();
            let inner = self.clone();
            async move {
                let result = inner.dispatch(&host, member.request).await;
                let _ = member.reply.send(result);
            }
        }))
        .await;
    }

    /// One network call: socket slot, host breaker, deadline, status classification.
    async fn dispatch(&self, host: &Arc<HostEntry>, request: RequestDescriptor) -> Result<UpstreamResponse> {
        let guard = host.acquire().await?;
        let limit = request.timeout.unwrap_or(self.settings.request_timeout);
        let start = std::time::Instant::now();

        tracing::trace!(request_id = %request.id, host = %host.key(), method = %request.method, "Sending upstream request");
        let connection = guard.connection().clone();
        let result = guard
            .breaker()
            .execute(|| async {
                with_timeout(limit, connection.send(&request))
                    .await
                    .and_then(classify_response)
            })
            .await;

        metrics::record_pool_request(host.key(), start);
        host.record_outcome(&result);
        if let Err(e) = &result {
            tracing::debug!(request_id = %request.id, host = %host.key(), error = %e, "Upstream request failed");
        }
        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pool::transport::Connection;
    use crate::resilience::circuit_breaker::CircuitState;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    type Responder = dyn Fn(&RequestDescriptor) -> Result<UpstreamResponse> + Send + Sync;

    #[derive(Clone)]
    struct MockConnector {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        latency: Duration,
        respond: Arc<Responder>,
    }

    impl std::fmt::Debug for MockConnector {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockConnector").finish()
        }
    }

    impl MockConnector {
        fn new(latency: Duration, respond: impl Fn(&RequestDescriptor) -> Result<UpstreamResponse> + Send + Sync + 'static) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                latency,
                respond: Arc::new(respond),
            }
        }

        fn ok() -> Self {
            Self::new(Duration::from_millis(5), |_| Ok(UpstreamResponse::new(200, "{\"ok\":true}")))
        }
    }

    impl Connector for MockConnector {
        fn connect(&self, _host: &str) -> Result<Arc<dyn Connection>> {
            Ok(Arc::new(self.clone()))
        }
    }

    #[async_trait]
    impl Connection for MockConnector {
        async fn send(&self, request: &RequestDescriptor) -> Result<UpstreamResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.respond)(request)
        }
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            max_sockets_per_host: 10,
            request_timeout: Duration::from_secs(5),
            batching_enabled: true,
            batch_max_size: 10,
            batch_window: Duration::from_millis(10),
            host_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout: Duration::from_secs(30),
                ..Default::default()
            },
        }
    }

    fn post(batchable: bool) -> RequestDescriptor {
        RequestDescriptor::post_json(Url::parse("http://upstream.test/v1/messages").unwrap(), serde_json::json!({}))
            .batchable(batchable)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_request() {
        let pool = ConnectionPoolManager::new(settings(), Arc::new(MockConnector::ok()), EventBus::new());
        let res = pool.request(post(false)).await.unwrap();
        assert_eq!(res.status, 200);

        let m = pool.metrics();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.batched_requests, 0);
        assert_eq!(m.hosts[0].host, "http://upstream.test:80");
    }

    #[tokio::test(start_paused = true)]
    async fn test_compatible_requests_share_a_batch() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let pool = ConnectionPoolManager::new(settings(), Arc::new(MockConnector::ok()), events);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.request(post(true)).await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().status, 200);
        }

        assert_eq!(pool.metrics().batched_requests, 3);
        assert_eq!(
            rx.recv().await.unwrap(),
            ResilienceEvent::BatchDispatched { host: "http://upstream.test:80".into(), size: 3 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_dispatches_before_window() {
        let mut s = settings();
        s.batch_max_size = 2;
        s.batch_window = Duration::from_secs(10);
        let pool = ConnectionPoolManager::new(s, Arc::new(MockConnector::ok()), EventBus::new());

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(pool.request(post(true)), pool.request(post(true)));
        assert!(a.is_ok() && b.is_ok());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.metrics().batched_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_batchable_requests_wait_for_window() {
        let mut s = settings();
        s.batch_window = Duration::from_millis(500);
        let pool = ConnectionPoolManager::new(s, Arc::new(MockConnector::ok()), EventBus::new());

        let start = tokio::time::Instant::now();
        pool.request(post(false)).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        pool.request(post(true)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(pool.metrics().batched_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_breaker_fails_fast_without_network() {
        let connector = MockConnector::new(Duration::from_millis(1), |_| Ok(UpstreamResponse::new(503, "down")));
        let calls = connector.calls.clone();
        let pool = ConnectionPoolManager::new(settings(), Arc::new(connector), EventBus::new());

        for _ in 0..2 {
            let err = pool.request(post(false)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExternalService);
        }
        let err = pool.request(post(false)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let host = pool.host("http://upstream.test:80").unwrap();
        assert_eq!(host.breaker().state(), CircuitState::Open);
        assert_eq!(host.breaker().metrics().rejected, 1);
        pool.reset_breakers();
        assert_eq!(host.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_capped_per_host() {
        let mut s = settings();
        s.max_sockets_per_host = 1;
        let connector = MockConnector::new(Duration::from_millis(100), |_| Ok(UpstreamResponse::new(200, "")));
        let peak = connector.peak.clone();
        let pool = ConnectionPoolManager::new(s, Arc::new(connector), EventBus::new());

        let (a, b, c) = tokio::join!(
            pool.request(post(false)),
            pool.request(post(false)),
            pool.request(post(false))
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstream_times_out() {
        let connector = MockConnector::new(Duration::from_secs(10), |_| Ok(UpstreamResponse::new(200, "")));
        let pool = ConnectionPoolManager::new(settings(), Arc::new(connector), EventBus::new());

        let err = pool
            .request(post(false).timeout(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { timeout_ms: 250 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_and_rejects_new() {
        let mut s = settings();
        s.batch_window = Duration::from_secs(60);
        let pool = ConnectionPoolManager::new(s, Arc::new(MockConnector::ok()), EventBus::new());

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.request(post(true)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(pool.metrics().hosts[0].pending, 1);

        pool.close().await;
        assert_eq!(waiting.await.unwrap().unwrap().status, 200);
        assert!(matches!(pool.request(post(false)).await, Err(ResilienceError::PoolClosed)));
        assert!(pool.is_closed());
    }
}
