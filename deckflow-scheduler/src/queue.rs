//! Priority queue of pending jobs.
//!
//! Ordered by priority (higher first), then submission order. Queued jobs can
//! be removed on cancel, so the length used for backpressure only counts jobs
//! that will actually run.

use crate::job::JobId;
use deckflow_core::error::FlowError;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Notify;

type Slot = (Reverse<i32>, u64);

#[derive(Debug, Default)]
struct QueueInner {
    order: BTreeMap<Slot, JobId>,
    slots: HashMap<JobId, Slot>,
    seq: u64,
}

#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    notify: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Enqueue, or refuse with [`FlowError::Overloaded`] when full.
    pub fn push(&self, id: JobId, priority: i32) -> Result<(), FlowError> {
        {
            let mut inner = self.inner.lock();
            let depth = inner.order.len();
            if depth >= self.capacity {
                return Err(FlowError::Overloaded {
                    depth,
                    capacity: self.capacity,
                });
            }
            inner.seq += 1;
            let slot = (Reverse(priority), inner.seq);
            inner.order.insert(slot, id);
            inner.slots.insert(id, slot);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the highest-priority job
    pub fn pop(&self) -> Option<JobId> {
        let mut inner = self.inner.lock();
        let (_, id) = inner.order.pop_first()?;
        inner.slots.remove(&id);
        Some(id)
    }

    pub fn remove(&self, id: &JobId) -> bool {
        let mut inner = self.inner.lock();
        match inner.slots.remove(id) {
            Some(slot) => inner.order.remove(&slot).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolves after the next push (or immediately if one is pending)
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Wake every waiting worker
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}
