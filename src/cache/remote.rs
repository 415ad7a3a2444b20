//! Shared remote cache tier.
//!
//! The manager talks to the shared store through [`RemoteStore`] so a
//! networked backend can be plugged in without touching tier logic.
//! [`MemoryStore`] is the in-process implementation used by default and in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::keys::glob_match;
use crate::error::Result;

/// Byte-oriented key/value store with per-key expiry and glob deletes.
#[async_trait]
pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern; returns the number removed.
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
    last_access: u64,
}

/// Concurrent in-process store bounded by entry count.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredValue>>,
    max_entries: usize,
    clock: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn live(&self, key: &str) -> Option<dashmap::mapref::one::RefMut<'_, String, StoredValue>> {
        let entry = self.inner.get_mut(key)?;
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.inner.remove(key);
            return None;
        }
        Some(entry)
    }

    fn evict_if_full(&self, incoming: &str) {
        if self.inner.len() < self.max_entries || self.inner.contains_key(incoming) {
            return;
        }
        let now = Instant::now();
        self.inner.retain(|_, v| now < v.expires_at);
        if self.inner.len() < self.max_entries {
            return;
        }
        let oldest = self
            .inner
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.inner.remove(&key);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let tick = self.tick();
        Ok(self.live(key).map(|mut entry| {
            entry.last_access = tick;
            entry.bytes.clone()
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.evict_if_full(key);
        let stored = StoredValue {
            bytes: value,
            expires_at: Instant::now() + ttl,
            last_access: self.tick(),
        };
        self.inner.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let before = self.inner.len();
        self.inner.retain(|k, _| !glob_match(pattern, k));
        Ok(before - self.inner.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
