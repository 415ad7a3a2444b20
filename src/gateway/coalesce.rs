//! Single-flight for identical concurrent cache misses.
//!
//! The first caller for a key runs the upstream call; callers arriving while
//! it is in flight wait for the same result instead of issuing their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{ResilienceError, Result};
use crate::observability::metrics;
use crate::observability::{EventBus, ResilienceEvent};

type Waiters<T> = Vec<oneshot::Sender<Result<T>>>;

/// Deduplicates concurrent work by key.
#[derive(Debug)]
pub struct Coalescer<T> {
    inflight: Mutex<HashMap<String, Waiters<T>>>,
    coalesced: AtomicU64,
    events: EventBus,
}

impl<T: Clone> Coalescer<T> {
    pub fn new(events: EventBus) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            coalesced: AtomicU64::new(0),
            events,
        }
    }

    /// Run `f` for `key`, or wait for the in-flight run of the same key.
    ///
    /// Waiters receive a clone of the leader's result, failures included.
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let waiter = {
            let mut inflight = self.lock();
            match inflight.get_mut(key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    inflight.insert(key.to_string(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            metrics::record_coalesced();
            tracing::debug!(key = %key, "Joining in-flight request");
            self.events.publish(ResilienceEvent::Coalesced { key: key.to_string() });
            return rx.await.unwrap_or_else(|_| {
                Err(ResilienceError::Internal("coalesced request was abandoned".into()))
            });
        }

        let flight = Flight { owner: self, key, done: false };
        let result = f().await;
        flight.finish(&result);
        result
    }

    /// Callers served by another caller's run.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Waiters<T>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Leader's claim on a key. Dropping it unfinished releases the waiters with an error.
struct Flight<'a, T: Clone> {
    owner: &'a Coalescer<T>,
    key: &'a str,
    done: bool,
}

impl<T: Clone> Flight<'_, T> {
    fn finish(mut self, result: &Result<T>) {
        self.done = true;
        let waiters = self.owner.lock().remove(self.key).unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }
}

impl<T: Clone> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.owner.lock().remove(self.key);
        }
    }
}
