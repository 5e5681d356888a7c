//! Application event definitions

use crate::hid::connection::{ConnectionId, ReadEvent};
use tokio::sync::mpsc;

/// Wrapper around `mpsc::UnboundedSender<AppEvent>` handed to every
/// producer thread (hot-plug watcher, read workers, signal handler).
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: AppEvent) -> Result<(), mpsc::error::SendError<AppEvent>> {
        self.tx.send(event)
    }
}

/// Create a connected sender/receiver pair
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<AppEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender::new(tx), rx)
}

/// Events consumed by the single controller task
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// OS reported a new HID interface path
    DeviceArrived(String),

    /// OS reported that a HID interface path went away
    DeviceRemoved(String),

    /// Read worker output for a live connection
    Read {
        connection: ConnectionId,
        event: ReadEvent,
    },

    /// Stop the consumer loop
    Shutdown,
}
