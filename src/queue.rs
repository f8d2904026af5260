//! FIFO of detected violations awaiting transmission
//!
//! Producers are the periodic sampler and the tracer event loop; the single
//! consumer is the transport's sender. `push` never blocks and the queue is
//! bounded only by memory. `pop` parks the consumer on a condition variable
//! until an item arrives or the agent shuts down.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::trace;

use crate::{ViolationInfo, cancel::CancellationToken, util::lock};

#[derive(Clone)]
pub struct ViolationQueue {
    inner: Arc<QueueInner>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueInner {
    items: Mutex<VecDeque<ViolationInfo>>,
    available: Condvar,
}

impl ViolationQueue {
    pub fn new(cancel: &CancellationToken) -> Self {
        let inner = Arc::new(QueueInner::default());

        let weak = Arc::downgrade(&inner);
        cancel.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                drop(lock(&inner.items));
                inner.available.notify_all();
            }
        });

        Self {
            inner,
            cancel: cancel.clone(),
        }
    }

    pub fn push(&self, item: ViolationInfo) {
        let mut items = lock(&self.inner.items);
        items.push_back(item);
        trace!("queued violation ({} pending): {item}", items.len());
        drop(items);
        self.inner.available.notify_one();
    }

    /// Block until a violation is available.
    ///
    /// Returns `None` once shutdown has been requested; items still queued at
    /// that point are abandoned.
    pub fn pop(&self) -> Option<ViolationInfo> {
        let mut items = lock(&self.inner.items);
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            items = self
                .inner
                .available
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove and return everything currently queued, in order.
    pub fn drain(&self) -> Vec<ViolationInfo> {
        lock(&self.inner.items).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
