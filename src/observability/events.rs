//! Typed event stream for cache, breaker, retry and pool activity.
//!
//! Components hold a cloned [`EventBus`] handle and publish into it; any number
//! of subscribers (health reporters, tests, audit sinks) receive every event
//! published after they subscribe. Slow subscribers lag rather than block
//! publishers.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::strategy::Tier;
use crate::resilience::circuit_breaker::CircuitState;

const DEFAULT_CAPACITY: usize = 1024;

/// Something observable happened inside the resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    BreakerTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    BreakerRejected {
        name: String,
    },
    CacheHit {
        key: String,
        tier: Tier,
    },
    CacheMiss {
        key: String,
    },
    CacheError {
        op: &'static str,
        message: String,
    },
    RetryScheduled {
        policy: String,
        attempt: u32,
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    BatchDispatched {
        host: String,
        size: usize,
    },
    Coalesced {
        key: String,
    },
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResilienceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: ResilienceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
