//! Per-host pool entry.
//!
//! # Responsibilities
//! - Hold the pooled connection for one remote host
//! - Cap concurrent requests to the host; excess callers queue
//! - Isolate host failures behind a dedicated breaker
//! - Keep the host's pending batches

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::EventBus;
use crate::pool::batcher::PendingBatch;
use crate::pool::transport::{Connection, UpstreamResponse};
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig};

/// Pool state for one remote host.
#[derive(Debug)]
pub struct HostEntry {
    key: String,
    connection: Arc<dyn Connection>,
    limiter: Arc<Semaphore>,
    max_sockets: usize,
    breaker: CircuitBreaker,
    active: AtomicUsize,
    requests: AtomicU64,
    failures: AtomicU64,
    batched: AtomicU64,
    /// Batch key → open batch.
    pending: Mutex<HashMap<String, PendingBatch>>,
}

/// Point-in-time view of one host.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetrics {
    pub host: String,
    pub active: usize,
    pub max_sockets: usize,
    pub total_requests: u64,
    pub failures: u64,
    pub batched_requests: u64,
    pub pending: usize,
    pub breaker: BreakerMetrics,
}

impl HostEntry {
    pub fn new(
        key: String,
        connection: Arc<dyn Connection>,
        max_sockets: usize,
        breaker: CircuitBreakerConfig,
        events: EventBus,
    ) -> Self {
        let max_sockets = max_sockets.max(1);
        Self {
            breaker: CircuitBreaker::new(format!("host:{}", key), breaker, events),
            key,
            connection,
            limiter: Arc::new(Semaphore::new(max_sockets)),
            max_sockets,
            active: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            batched: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Wait for a free socket slot.
    pub async fn acquire(self: &Arc<Self>) -> Result<ConnectionGuard> {
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ResilienceError::PoolClosed)?;
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_pool_active(&self.key, active);
        Ok(ConnectionGuard {
            host: self.clone(),
            _permit: permit,
        })
    }

    pub fn record_outcome(&self, result: &Result<UpstreamResponse>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batched(&self, size: usize) {
        self.batched.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingBatch>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove the batch `id` if it is still open under `batch_key`.
    pub fn take_batch(&self, batch_key: &str, id: Uuid) -> Option<PendingBatch> {
        let mut pending = self.pending();
        match pending.get(batch_key) {
            Some(batch) if batch.id == id => pending.remove(batch_key),
            _ => None,
        }
    }

    pub fn take_all_batches(&self) -> Vec<PendingBatch> {
        self.pending().drain().map(|(_, batch)| batch).collect()
    }

    /// Wait until every in-flight request has released its slot, then refuse new ones.
    pub async fn drain(&self) {
        if let Ok(all) = self.limiter.acquire_many(self.max_sockets as u32).await {
            all.forget();
        }
        self.limiter.close();
    }

    pub fn metrics(&self) -> HostMetrics {
        HostMetrics {
            host: self.key.clone(),
            active: self.active(),
            max_sockets: self.max_sockets,
            total_requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            batched_requests: self.batched.load(Ordering::Relaxed),
            pending: self.pending().values().map(PendingBatch::len).sum(),
            breaker: self.breaker.metrics(),
        }
    }
}

/// Holds a socket slot on a host; releases it on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    host: Arc<HostEntry>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for ConnectionGuard {
    type Target = HostEntry;
    fn deref(&self) -> &Self::Target {
        &self.host
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.host.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_pool_active(&self.host.key, active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::transport::RequestDescriptor;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Idle;

    #[async_trait]
    impl Connection for Idle {
        async fn send(&self, _: &RequestDescriptor) -> Result<UpstreamResponse> {
            Ok(UpstreamResponse::new(200, ""))
        }
    }

    fn entry(max: usize) -> Arc<HostEntry> {
        Arc::new(HostEntry::new(
            "http://h:80".into(),
            Arc::new(Idle),
            max,
            CircuitBreakerConfig::default(),
            EventBus::new(),
        ))
    }

    #[tokio::test]
    async fn test_guard_tracks_active() {
        let host = entry(2);
        let a = host.acquire().await.unwrap();
        let b = host.acquire().await.unwrap();
        assert_eq!(host.active(), 2);
        drop(a);
        assert_eq!(host.active(), 1);
        drop(b);
        assert_eq!(host.active(), 0);
    }

    #[tokio::test]
    async fn test_drain_refuses_new_slots() {
        let host = entry(1);
        host.drain().await;
        assert!(matches!(host.acquire().await, Err(ResilienceError::PoolClosed)));
    }

    #[test]
    fn test_take_batch_only_matching_id() {
        let host = entry(1);
        let batch = PendingBatch::new();
        let id = batch.id;
        host.pending().insert("POST".into(), batch);

        assert!(host.take_batch("POST", Uuid::new_v4()).is_none());
        assert!(host.take_batch("POST", id).is_some());
        assert!(host.take_all_batches().is_empty());
    }
}
