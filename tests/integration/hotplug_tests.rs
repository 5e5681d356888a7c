//! Arrival, removal and report handling

use crate::common::*;
use hid_tray::core::events::AppEvent;
use hid_tray::core::store::Store;
use hid_tray::hid::backend::ReadError;
#[cfg(not(windows))]
use hid_tray::hid::backend::instance_path;
use hid_tray::hid::connection::ReadEvent;
use hid_tray::hid::hotplug::IgnoreReason;
use hid_tray::hid::protocol::{DecodeError, Message, MessageKey};
use hid_tray::hid::sinks::SinkOutcome;
use hid_tray::hid::ArrivalOutcome;
use hid_tray::notify::IconHint;

#[test]
fn test_arrival_connects_and_persists_descriptor() {
    let h = harness();
    let path = footswitch_path("01");
    h.backend.plug(&path);

    let outcome = h.controller.handle_arrival(&path);
    assert!(matches!(outcome, ArrivalOutcome::Connected(_)));
    assert_eq!(h.controller.live_count(), 1);
    assert_eq!(h.notifier.count("Device ready"), 1);

    let notes = h.notifier.notes.lock();
    assert_eq!(notes[0].0, "FootSwitch Device Status:");
    drop(notes);

    let stored = h.store.load_devices().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].raw_device_path, path);
    assert_eq!(stored[0].serial_number.as_deref(), Some("FS-0001"));
    assert!(stored[0].active);
}

#[test]
fn test_second_interface_of_same_device_is_folded() {
    let h = harness();
    let data = footswitch_path("01");
    let keyboard = footswitch_path("00");
    h.backend.plug(&data);
    h.backend.plug(&keyboard);

    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("first interface should connect");
    };
    assert_eq!(
        h.controller.handle_arrival(&keyboard),
        ArrivalOutcome::AlreadyConnected(id)
    );
    assert_eq!(h.controller.live_count(), 1);
    assert_eq!(h.backend.opened.lock().len(), 1);
}

#[test]
fn test_unrelated_interface_first_is_ignored() {
    let h = harness();
    let keyboard = footswitch_path("00");
    h.backend.plug(&keyboard);
    assert_eq!(
        h.controller.handle_arrival(&keyboard),
        ArrivalOutcome::Ignored(IgnoreReason::WrongInterface)
    );
    assert_eq!(h.controller.live_count(), 0);
}

#[test]
fn test_ble_and_unsupported_paths_are_ignored() {
    let h = harness();
    assert_eq!(
        h.controller.handle_arrival(&ble_path()),
        ArrivalOutcome::Ignored(IgnoreReason::Bluetooth)
    );

    let other = format!(r"\\?\HID#VID_1234&PID_5678#{}#{}", PORT, GUID);
    assert_eq!(
        h.controller.handle_arrival(&other),
        ArrivalOutcome::Ignored(IgnoreReason::Unsupported)
    );

    assert_eq!(
        h.controller.handle_arrival(r"\\?\ROOT#SYSTEM#0000"),
        ArrivalOutcome::Ignored(IgnoreReason::NotHid)
    );
    assert!(h.notifier.notes.lock().is_empty());
    assert!(h.backend.opened.lock().is_empty());
}

#[test]
fn test_supported_but_not_enumerated_is_skipped() {
    let h = harness();
    assert_eq!(
        h.controller.handle_arrival(&footswitch_path("01")),
        ArrivalOutcome::Ignored(IgnoreReason::NotEnumerated)
    );
}

#[test]
fn test_open_failure_notifies_not_ready() {
    let h = harness();
    let path = footswitch_path("01");
    // Listed by enumeration but no handle to open
    h.backend.present.lock().push(path.clone());

    assert!(matches!(
        h.controller.handle_arrival(&path),
        ArrivalOutcome::OpenFailed(_)
    ));
    assert_eq!(h.notifier.count("Device not ready"), 1);
    assert_eq!(h.controller.live_count(), 0);
}

#[test]
fn test_duplicate_removal_notifies_once() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    h.controller.handle_arrival(&data);

    assert!(h.controller.handle_removal(&data));
    assert!(!h.controller.handle_removal(&footswitch_path("00")));
    assert!(!h.controller.handle_removal(&data));

    assert_eq!(h.notifier.count("Device unplugged"), 1);
    assert_eq!(h.controller.live_count(), 0);
}

#[test]
fn test_removal_through_sibling_interface_path() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    h.controller.handle_arrival(&data);

    assert!(h.controller.handle_removal(&footswitch_path("00").to_uppercase()));
    assert_eq!(h.controller.live_count(), 0);
}

#[test]
fn test_known_device_reopens_stored_path() {
    let h = harness();
    let data = footswitch_path("01");
    let keyboard = footswitch_path("00");
    h.backend.plug(&data);
    h.backend.plug(&keyboard);

    h.controller.handle_arrival(&data);
    h.controller.handle_removal(&data);

    assert!(matches!(
        h.controller.handle_arrival(&keyboard),
        ArrivalOutcome::Connected(_)
    ));
    let opened = h.backend.opened.lock();
    assert_eq!(opened.as_slice(), &[data.clone(), data]);
}

#[test]
fn test_inactive_known_device_is_not_opened() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    h.controller.handle_arrival(&data);
    h.controller.handle_removal(&data);

    assert!(h.controller.with_catalog(|catalog| catalog.set_active(&data, false)));
    assert_eq!(
        h.controller.handle_arrival(&data),
        ArrivalOutcome::Ignored(IgnoreReason::Inactive)
    );
    assert!(!h.store.load_devices().unwrap()[0].active);
}

#[test]
fn test_reports_flow_through_worker_in_order() {
    let mut h = harness();
    let data = footswitch_path("01");
    let handle = h.backend.plug(&data);
    handle
        .reads
        .lock()
        .extend([Ok(Vec::new()), Ok(layer_report(2)), Ok(layer_report(4))]);

    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };

    // The empty read produces nothing; the first event is layer 2
    for expected in [2u8, 4] {
        match next_event(&mut h.rx) {
            AppEvent::Read {
                connection,
                event: ReadEvent::Report(bytes),
            } => {
                assert_eq!(connection, id);
                assert_eq!(bytes, layer_report(expected));
                let outcome = h.controller.handle_read_event(connection, ReadEvent::Report(bytes));
                assert!(matches!(
                    outcome,
                    SinkOutcome::Firmware { layer_changed: Some(l), .. } if l == expected
                ));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(h.controller.live_devices()[0].state.layer, 4);
}

#[test]
fn test_read_failure_closes_and_notifies() {
    let mut h = harness();
    let data = footswitch_path("01");
    let handle = h.backend.plug(&data);
    handle.reads.lock().push_back(Err(ReadError::Disconnected));
    h.controller.handle_arrival(&data);

    let AppEvent::Read { connection, event } = next_event(&mut h.rx) else {
        panic!("expected a read event");
    };
    assert_eq!(event, ReadEvent::Failed(ReadError::Disconnected));
    h.controller.handle_read_event(connection, event);

    assert_eq!(h.controller.live_count(), 0);
    let notes = h.notifier.notes.lock();
    let last = notes.last().unwrap();
    assert_eq!(last.1, "Device connection lost");
    assert_eq!(last.2, IconHint::Error);
}

#[test]
fn test_malformed_report_keeps_connection() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };

    let outcome = h.controller.handle_report(id, &[0u8; 64]);
    assert!(matches!(outcome, SinkOutcome::Malformed(DecodeError::BadFormat(_))));
    let short = h.controller.handle_report(id, &[0u8; 8]);
    assert_eq!(short, SinkOutcome::Malformed(DecodeError::BufferTooShort(8)));

    assert_eq!(h.notifier.count("Wrong data from the USB Device"), 2);
    let notes = h.notifier.notes.lock();
    let last = notes.last().unwrap();
    assert_eq!(last.0, "FootSwitch Device Status:");
    assert_eq!(last.2, IconHint::Warning);
    drop(notes);
    assert_eq!(h.controller.live_count(), 1);
}

#[test]
fn test_layer_burst_announces_last_layer_once() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };

    h.controller.handle_report(id, &layer_report(3));
    h.controller.handle_report(id, &layer_report(5));
    // Same layer again is not a change
    assert!(matches!(
        h.controller.handle_report(id, &layer_report(5)),
        SinkOutcome::Firmware { layer_changed: None, .. }
    ));

    assert!(wait_until(|| h.notifier.count("Layer 5") == 1));
    assert_eq!(h.notifier.count("Layer 3"), 0);
    assert_eq!(h.controller.announced_layer(), 5);
    assert_eq!(h.notifier.icons.lock().last(), Some(&5));
}

#[test]
fn test_send_writes_encoded_report() {
    let h = harness();
    let data = footswitch_path("01");
    let handle = h.backend.plug(&data);
    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };

    let message = Message::new().with(MessageKey::Layer, 1).unwrap();
    assert!(h.controller.send(id, &message));

    let written = handle.written.lock();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0], layer_report(1));
}

#[test]
fn test_shutdown_closes_silently() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    h.controller.handle_arrival(&data);
    let before = h.notifier.notes.lock().len();

    h.controller.shutdown();
    assert_eq!(h.controller.live_count(), 0);
    assert_eq!(h.notifier.notes.lock().len(), before);
}

#[test]
fn test_unplug_drops_pending_layer_announcement() {
    let h = harness();
    let data = footswitch_path("01");
    h.backend.plug(&data);
    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };

    h.controller.handle_report(id, &layer_report(4));
    assert!(h.controller.handle_removal(&data));
    std::thread::sleep(std::time::Duration::from_millis(500));

    assert_eq!(h.notifier.count("Layer 4"), 0);
    assert_eq!(h.controller.announced_layer(), 0);
    assert_eq!(h.notifier.icons.lock().last(), Some(&0));
}

#[test]
fn test_read_failure_resets_announced_layer() {
    let mut h = harness();
    let data = footswitch_path("01");
    let handle = h.backend.plug(&data);
    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };
    h.controller.handle_report(id, &layer_report(3));
    assert!(wait_until(|| h.controller.announced_layer() == 3));

    handle.reads.lock().push_back(Err(ReadError::Disconnected));
    let AppEvent::Read { connection, event } = next_event(&mut h.rx) else {
        panic!("expected a read event");
    };
    h.controller.handle_read_event(connection, event);

    assert_eq!(h.controller.announced_layer(), 0);
    assert_eq!(h.notifier.icons.lock().last(), Some(&0));
}

/// Interfaces of a foot switch on USB port 1-2, as the non-Windows backend
/// names them
#[cfg(not(windows))]
fn usb_footswitch_path(node: &str, interface: i32) -> String {
    instance_path(node, 0x35EE, 0x1308, interface, "usb:1-2")
}

#[cfg(not(windows))]
#[test]
fn test_disabled_device_stays_disabled_after_replug_on_new_node() {
    let h = harness();
    let data = usb_footswitch_path("/dev/hidraw3", 1);
    let keyboard = usb_footswitch_path("/dev/hidraw2", 0);
    h.backend.plug(&data);
    h.backend.plug(&keyboard);

    let ArrivalOutcome::Connected(id) = h.controller.handle_arrival(&data) else {
        panic!("should connect");
    };
    assert_eq!(
        h.controller.handle_arrival(&keyboard),
        ArrivalOutcome::AlreadyConnected(id)
    );
    assert!(h.controller.handle_removal(&data));
    h.backend.unplug(&data);
    h.backend.unplug(&keyboard);
    assert!(h.controller.with_catalog(|catalog| catalog.set_active(&data, false)));

    // The kernel hands out new hidraw nodes on replug
    let replugged = usb_footswitch_path("/dev/hidraw5", 1);
    h.backend.plug(&replugged);
    assert_eq!(
        h.controller.handle_arrival(&replugged),
        ArrivalOutcome::Ignored(IgnoreReason::Inactive)
    );
    assert_eq!(h.controller.with_catalog(|catalog| catalog.list(false).len()), 1);

    // Re-enabled: opens the new node and remembers it
    assert!(h.controller.with_catalog(|catalog| catalog.set_active(&replugged, true)));
    assert!(matches!(
        h.controller.handle_arrival(&replugged),
        ArrivalOutcome::Connected(_)
    ));
    assert_eq!(h.backend.opened.lock().last(), Some(&replugged));
    let stored = h.store.load_devices().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].raw_device_path, replugged);
}
