//! Single consumer of [`AppEvent`]s
//!
//! Every controller call happens here, one event at a time, so reports of a
//! connection are handled in the order the worker produced them.

use super::events::AppEvent;
use crate::hid::hotplug::HotplugController;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Apply one event to the controller. Returns false for [`AppEvent::Shutdown`].
pub fn dispatch(controller: &HotplugController, event: AppEvent) -> bool {
    match event {
        AppEvent::DeviceArrived(path) => {
            let outcome = controller.handle_arrival(&path);
            debug!("Arrival {}: {:?}", path, outcome);
        }
        AppEvent::DeviceRemoved(path) => {
            controller.handle_removal(&path);
        }
        AppEvent::Read { connection, event } => {
            controller.handle_read_event(connection, event);
        }
        AppEvent::Shutdown => return false,
    }
    true
}

/// Consume events until `Shutdown` or until every sender is gone, then
/// close all connections.
///
/// Controller calls may block (closing joins a worker, catalog changes hit
/// the store), so each one runs on the blocking pool and is awaited before
/// the next event is taken.
pub async fn run_event_loop(
    controller: Arc<HotplugController>,
    mut rx: mpsc::UnboundedReceiver<AppEvent>,
) {
    info!("Event loop started");
    while let Some(event) = rx.recv().await {
        let worker = Arc::clone(&controller);
        match tokio::task::spawn_blocking(move || dispatch(&worker, event)).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Shutdown requested");
                break;
            }
            Err(e) => error!("Event handler panicked: {}", e),
        }
    }

    let worker = Arc::clone(&controller);
    if let Err(e) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
        error!("Shutdown failed: {}", e);
    }
    info!("Event loop stopped");
}
