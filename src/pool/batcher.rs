//! Pending batch bookkeeping.
//!
//! A batch collects compatible requests (same host, same method, batchable)
//! for a short window. Every member keeps its own reply channel and receives
//! its own result.

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::pool::transport::{RequestDescriptor, UpstreamResponse};

/// A queued request and where its result goes.
#[derive(Debug)]
pub struct BatchMember {
    pub request: RequestDescriptor,
    pub reply: oneshot::Sender<Result<UpstreamResponse>>,
}

/// Requests waiting for the same dispatch window.
#[derive(Debug)]
pub struct PendingBatch {
    pub id: Uuid,
    pub opened_at: Instant,
    pub members: Vec<BatchMember>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            opened_at: Instant::now(),
            members: Vec::new(),
        }
    }

    pub fn push(&mut self, member: BatchMember) {
        self.members.push(member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.members.len() >= max_size
    }
}

impl Default for PendingBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Compatibility key within a host, or `None` when the request must go alone.
pub fn batch_key(request: &RequestDescriptor) -> Option<String> {
    request.batchable.then(|| request.method.as_str().to_string())
}
