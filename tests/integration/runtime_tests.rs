//! Event loop behaviour

use crate::common::*;
use hid_tray::core::events::{self, AppEvent};
use hid_tray::core::runtime::{dispatch, run_event_loop};
use hid_tray::hid::connection::ConnectionId;
use hid_tray::hid::connection::ReadEvent;
use hid_tray::hid::HotplugWatcher;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_dispatch_stops_on_shutdown() {
    let h = harness();
    assert!(dispatch(
        &h.controller,
        AppEvent::DeviceRemoved(footswitch_path("01"))
    ));
    assert!(dispatch(
        &h.controller,
        AppEvent::Read {
            connection: ConnectionId(99),
            event: ReadEvent::Report(layer_report(1)),
        }
    ));
    assert!(!dispatch(&h.controller, AppEvent::Shutdown));
}

#[test]
fn test_event_loop_handles_arrival_then_shutdown() {
    let h = harness();
    let path = footswitch_path("01");
    h.backend.plug(&path);

    let (tx, rx) = events::channel();
    tx.send(AppEvent::DeviceArrived(path.clone())).unwrap();
    tx.send(AppEvent::DeviceArrived(footswitch_path("00")))
        .unwrap();
    tx.send(AppEvent::Shutdown).unwrap();

    tokio_test::block_on(run_event_loop(Arc::clone(&h.controller), rx));

    assert_eq!(h.notifier.count("Device ready"), 1);
    assert_eq!(h.backend.opened.lock().len(), 1);
    // Shutdown closes without a notification
    assert_eq!(h.controller.live_count(), 0);
    assert_eq!(h.notifier.count("Device unplugged"), 0);
}

#[test]
fn test_event_loop_ends_when_senders_drop() {
    let h = harness();
    let (tx, rx) = events::channel();
    tx.send(AppEvent::DeviceRemoved(footswitch_path("01")))
        .unwrap();
    drop(tx);

    tokio_test::block_on(run_event_loop(Arc::clone(&h.controller), rx));
    assert_eq!(h.controller.live_count(), 0);
}

#[test]
fn test_watcher_feeds_controller() {
    let mut h = harness();
    let path = footswitch_path("01");
    h.backend.plug(&path);

    let (tx, mut rx) = events::channel();
    let mut watcher = HotplugWatcher::start(
        Arc::clone(&h.backend) as Arc<dyn hid_tray::hid::HidBackend>,
        tx,
        Duration::from_millis(10),
    )
    .unwrap();

    let arrived = next_event(&mut rx);
    assert!(matches!(arrived, AppEvent::DeviceArrived(ref p) if *p == path));
    assert!(dispatch(&h.controller, arrived));
    assert_eq!(h.controller.live_count(), 1);

    h.backend.present.lock().clear();
    let removed = next_event(&mut rx);
    assert!(matches!(removed, AppEvent::DeviceRemoved(ref p) if *p == path));
    assert!(dispatch(&h.controller, removed));
    assert_eq!(h.controller.live_count(), 0);
    assert_eq!(h.notifier.count("Device unplugged"), 1);

    watcher.stop();
    // Controller's own channel only carries read events here
    while let Ok(event) = h.rx.try_recv() {
        assert!(matches!(event, AppEvent::Read { .. }));
    }
}
