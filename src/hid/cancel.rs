//! Cancellation token shared by a worker thread and its owner

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cvar: Condvar,
    notify: Notify,
}

/// Cloneable one-shot cancel signal.
///
/// Threads block on a condition variable and async code awaits
/// [`CancelToken::cancelled`]; `cancel()` wakes both at once.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cvar.notify_all();
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Block until cancelled or `timeout` elapses. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.inner.cancelled.lock();
        if !*cancelled {
            let _ = self.inner.cvar.wait_while_for(&mut cancelled, |c| !*c, timeout);
        }
        *cancelled
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
