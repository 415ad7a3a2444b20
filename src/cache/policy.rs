//! Per-content-type expiry policy.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::schema::CacheConfig;

/// TTL table with a global fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    default: Duration,
    per_type: HashMap<String, Duration>,
}

impl TtlPolicy {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>, ttl: Duration) -> Self {
        self.per_type.insert(content_type.into(), ttl);
        self
    }

    /// TTL for `content_type`, or the default when it is not registered.
    pub fn ttl_for(&self, content_type: &str) -> Duration {
        self.per_type.get(content_type).copied().unwrap_or(self.default)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default
    }
}

impl From<&CacheConfig> for TtlPolicy {
    fn from(config: &CacheConfig) -> Self {
        config.ttl.iter().fold(
            TtlPolicy::new(Duration::from_secs(config.default_ttl_secs)),
            |policy, (content_type, secs)| policy.with_type(content_type.clone(), Duration::from_secs(*secs)),
        )
    }
}
