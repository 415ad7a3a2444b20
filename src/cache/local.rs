//! Bounded in-process cache tier.
//!
//! # Design Decisions
//! - Fixed capacity; inserting into a full cache evicts the least recently used entry
//! - Entries expire at `min(ttl, max_age)` after insertion
//! - Expired entries are dropped lazily on access
//! - One mutex guards map and recency index together

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::entry::CacheEntry;
use crate::cache::keys::glob_match;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    expires_at: Instant,
    tick: u64,
}

#[derive(Debug, Default)]
struct LocalInner {
    slots: HashMap<String, Slot>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
    evictions: u64,
}

impl LocalInner {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.slots.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }
}

/// Size- and age-bounded most-recently-used cache.
#[derive(Debug)]
pub struct LocalCache {
    capacity: usize,
    max_age: Duration,
    inner: Mutex<LocalInner>,
}

impl LocalCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age,
            inner: Mutex::new(LocalInner::default()),
        }
    }

    /// Fetch a live entry and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let expired = match inner.slots.get(key) {
            None => return None,
            Some(slot) => Instant::now() >= slot.expires_at,
        };
        if expired {
            inner.remove(key);
            return None;
        }
        inner.touch(key);
        inner.slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let inner = self.lock();
        inner
            .slots
            .get(key)
            .map(|slot| Instant::now() < slot.expires_at)
            .unwrap_or(false)
    }

    /// Insert or replace. Returns true when another entry was evicted to make room.
    pub fn insert(&self, entry: CacheEntry, ttl: Duration) -> bool {
        let key = entry.key.clone();
        let expires_at = Instant::now() + ttl.min(self.max_age);
        let mut inner = self.lock();

        inner.remove(&key);
        let mut evicted = false;
        if inner.slots.len() >= self.capacity {
            let oldest = inner.recency.iter().next().map(|(_, k)| k.clone());
            if let Some(oldest) = oldest {
                inner.remove(&oldest);
                inner.evictions += 1;
                evicted = true;
                tracing::trace!(key = %oldest, "Evicted least recently used local entry");
            }
        }

        inner.tick += 1;
        let tick = inner.tick;
        inner.recency.insert(tick, key.clone());
        inner.slots.insert(key, Slot { entry, expires_at, tick });
        evicted
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every key matching a glob pattern.
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<String> = inner
            .slots
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.slots.len();
        inner.slots.clear();
        inner.recency.clear();
        count
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| now >= slot.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }

    fn lock(&self) -> MutexGuard<'_, LocalInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(key.to_string(), serde_json::json!({ "k": key }), "config", Duration::from_secs(60))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LocalCache::new(2, Duration::from_secs(3600));
        cache.insert(entry("a"), Duration::from_secs(60));
        cache.insert(entry("b"), Duration::from_secs(60));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        assert!(cache.insert(entry("c"), Duration::from_secs(60)));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let cache = LocalCache::new(1, Duration::from_secs(3600));
        cache.insert(entry("a"), Duration::from_secs(60));
        assert!(!cache.insert(entry("a"), Duration::from_secs(60)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_ttl_or_max_age() {
        let cache = LocalCache::new(10, Duration::from_secs(5));
        cache.insert(entry("short"), Duration::from_secs(1));
        cache.insert(entry("capped"), Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(cache.get("short").is_none());
        assert!(cache.contains("capped"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_matching() {
        let cache = LocalCache::new(10, Duration::from_secs(3600));
        for k in ["g:t:prefix_1", "g:t:prefix_2", "g:t:other"] {
            cache.insert(entry(k), Duration::from_secs(60));
        }
        assert_eq!(cache.remove_matching("g:t:prefix_*"), 2);
        assert!(cache.contains("g:t:other"));
        assert_eq!(cache.clear(), 1);
    }
}
