//! Polling hot-plug source
//!
//! Diffs the set of enumerated interface paths every poll interval and turns
//! the difference into arrival/removal events.

use super::backend::HidBackend;
use super::cancel::CancelToken;
use crate::core::events::{AppEvent, EventSender};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Arrivals and removals between two enumerations
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PathDiff {
    pub arrived: Vec<String>,
    pub removed: Vec<String>,
}

impl PathDiff {
    pub fn between(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            arrived: current.difference(previous).cloned().collect(),
            removed: previous.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.removed.is_empty()
    }
}

/// Background thread feeding [`AppEvent::DeviceArrived`] and
/// [`AppEvent::DeviceRemoved`] into the event channel
pub struct HotplugWatcher {
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Start polling. The first pass reports every present interface.
    pub fn start(
        backend: Arc<dyn HidBackend>,
        events: EventSender,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let cancel = CancelToken::new();
        let stop = cancel.clone();
        let thread = thread::Builder::new()
            .name("hid-hotplug".to_string())
            .spawn(move || {
                info!("HID hot-plug watcher started ({}ms)", interval.as_millis());
                let mut known = BTreeSet::new();
                loop {
                    match backend.enumerate() {
                        Ok(devices) => {
                            let current: BTreeSet<String> =
                                devices.into_iter().map(|d| d.path).collect();
                            let diff = PathDiff::between(&known, &current);
                            if !diff.is_empty() {
                                debug!(
                                    "Hot-plug: {} arrived, {} removed",
                                    diff.arrived.len(),
                                    diff.removed.len()
                                );
                            }
                            if !send_diff(&events, diff) {
                                break;
                            }
                            known = current;
                        }
                        Err(e) => debug!("Failed to enumerate HID devices: {}", e),
                    }
                    if stop.wait_timeout(interval) {
                        break;
                    }
                }
                info!("HID hot-plug watcher stopped");
            })?;

        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    /// Stop the watcher and wait for its thread
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("HID hot-plug watcher panicked");
            }
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Removals go first so a re-plugged device is torn down before it returns.
/// Returns false once the receiver is gone.
fn send_diff(events: &EventSender, diff: PathDiff) -> bool {
    let removals = diff.removed.into_iter().map(AppEvent::DeviceRemoved);
    let arrivals = diff.arrived.into_iter().map(AppEvent::DeviceArrived);
    for event in removals.chain(arrivals) {
        if events.send(event).is_err() {
            return false;
        }
    }
    true
}
