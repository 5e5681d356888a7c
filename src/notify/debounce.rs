//! Resettable timer that coalesces bursts of updates

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

struct Pending<T> {
    value: Option<T>,
    deadline: Option<Instant>,
    /// The callback is running outside the lock
    firing: bool,
    stopped: bool,
}

struct Shared<T> {
    pending: Mutex<Pending<T>>,
    cvar: Condvar,
}

/// Runs a callback once per quiet period with the latest triggered value.
///
/// Every `trigger` re-arms the timer; the callback fires `window` after the
/// last trigger. A value still pending when the debouncer is cancelled or
/// dropped is discarded.
pub struct Debouncer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    window: Duration,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(name: &str, window: Duration, callback: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                value: None,
                deadline: None,
                firing: false,
                stopped: false,
            }),
            cvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("debounce-{}", name))
            .spawn(move || run(&worker_shared, callback))
            .map_err(|e| error!("Failed to spawn debounce thread: {}", e))
            .ok();

        Self {
            shared,
            window,
            worker,
        }
    }

    /// Store `value` and restart the quiet period
    pub fn trigger(&self, value: T) {
        let mut pending = self.shared.pending.lock();
        pending.value = Some(value);
        pending.deadline = Some(Instant::now() + self.window);
        self.shared.cvar.notify_all();
    }

    /// Discard the pending value. If the callback is already running, wait
    /// for it to return, so nothing fires after this call.
    ///
    /// Must not be called from inside the callback.
    pub fn cancel(&self) {
        let mut pending = self.shared.pending.lock();
        pending.value = None;
        pending.deadline = None;
        while pending.firing {
            self.shared.cvar.wait(&mut pending);
        }
        self.shared.cvar.notify_all();
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn run<T, F: Fn(T)>(shared: &Shared<T>, callback: F) {
    let mut pending = shared.pending.lock();
    loop {
        if pending.stopped {
            break;
        }
        match pending.deadline {
            None => shared.cvar.wait(&mut pending),
            Some(deadline) if Instant::now() >= deadline => {
                pending.deadline = None;
                if let Some(value) = pending.value.take() {
                    pending.firing = true;
                    MutexGuard::unlocked(&mut pending, || callback(value));
                    pending.firing = false;
                    shared.cvar.notify_all();
                }
            }
            Some(deadline) => {
                let _ = shared.cvar.wait_until(&mut pending, deadline);
            }
        }
    }
    debug!("Debounce thread stopped");
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        {
            let mut pending = self.shared.pending.lock();
            pending.stopped = true;
            self.shared.cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
