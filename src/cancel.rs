//! Cooperative cancellation shared by every agent thread
//!
//! The token is handed to each loop at construction time. Components that
//! block on their own condition variable register a waker with
//! [`CancellationToken::on_cancel`] so that cancelling never leaves a thread
//! parked on a wait that nothing will signal again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::util::lock;

type Waker = Box<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    sleep_lock: Mutex<()>,
    sleepers: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request shutdown. Idempotent; wakers run exactly once.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        drop(lock(&self.inner.sleep_lock));
        self.inner.sleepers.notify_all();

        let wakers = std::mem::take(&mut *lock(&self.inner.wakers));
        for wake in wakers {
            wake();
        }
    }

    /// Run `wake` when the token is cancelled, or right away if it already is.
    pub fn on_cancel<F>(&self, wake: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut wakers = lock(&self.inner.wakers);
        if self.is_cancelled() {
            drop(wakers);
            wake();
            return;
        }
        wakers.push(Box::new(wake));
    }

    /// Sleep for `duration` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = lock(&self.inner.sleep_lock);
        let _ = self
            .inner
            .sleepers
            .wait_timeout_while(guard, duration, |_| !self.is_cancelled())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_cancelled()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
