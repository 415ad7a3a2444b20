//! Stored cache record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A cached payload with its provenance and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Storage key (already namespaced).
    pub key: String,
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    pub content_type: String,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(key: String, payload: serde_json::Value, content_type: &str, ttl: Duration) -> Self {
        Self {
            key,
            payload,
            created_at_ms: now_ms(),
            content_type: content_type.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Time left before the entry is logically stale.
    pub fn remaining_ttl(&self) -> Duration {
        let age = now_ms().saturating_sub(self.created_at_ms);
        Duration::from_millis(self.ttl_ms.saturating_sub(age))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_creation_time() {
        let mut entry = CacheEntry::new("k".into(), serde_json::json!(1), "config", Duration::from_secs(10));
        assert!(!entry.remaining_ttl().is_zero());
        assert!(entry.remaining_ttl() <= Duration::from_secs(10));

        entry.created_at_ms -= 11_000;
        assert!(entry.remaining_ttl().is_zero());
    }
}
