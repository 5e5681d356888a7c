//! Path parsing and wire format from the outside

use hid_tray::hid::device_name::DeviceIdentity;
use hid_tray::hid::keycodes::key_name;
use hid_tray::hid::protocol::{self, DecodeError, Message, MessageKey, RAW_EPSIZE};

#[test]
fn test_parse_footswitch_path() {
    let path = r"\\?\HID#VID_35EE&PID_1308&MI_01#1a2b&3c4d&0&0001#{4d1e55b2-f16f-11cf-88cb-001111000030}";
    let identity = DeviceIdentity::parse(path);
    assert_eq!(identity.ids(), Some((0x35EE, 0x1308)));
    assert!(identity.has_interface(Some("&MI_01")));
    assert!(!identity.has_interface(Some("&MI_00")));
    assert_eq!(identity.port(), Some("1a2b&3c4d&0&0001"));
    assert!(identity.is_actionable());
}

#[test]
fn test_decode_layer_report() {
    let mut report = [0u8; RAW_EPSIZE];
    report[1..9].copy_from_slice(&[0xA4, b'Q', b'M', b'V', b'1', 0x81, 0x02, 0x05]);

    let message = protocol::decode(&report).unwrap();
    assert_eq!(message.len(), 1);
    assert_eq!(message.value_for(MessageKey::Layer), Some(5));
    assert_eq!(message.to_string(), "layer=5");
}

#[test]
fn test_decode_rejects_short_and_untagged_reports() {
    assert_eq!(
        protocol::decode(&[0u8; 63]),
        Err(DecodeError::BufferTooShort(63))
    );

    let mut report = [0u8; RAW_EPSIZE];
    report[1..6].copy_from_slice(&[0xA4, b'Q', b'M', b'V', b'2']);
    assert!(matches!(
        protocol::decode(&report),
        Err(DecodeError::BadFormat(_))
    ));
}

#[test]
fn test_message_survives_encode_and_decode() {
    let message = Message::new()
        .with(MessageKey::Keycode, 0x5221)
        .unwrap()
        .with(MessageKey::Layer, 2)
        .unwrap()
        .with(MessageKey::LedState, 0x80)
        .unwrap();

    let mut report = protocol::encode_report(&message, RAW_EPSIZE).unwrap();
    report[0] = 0x7F;
    let decoded = protocol::decode(&report).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(
        key_name(decoded.value_for(MessageKey::Keycode).unwrap()),
        "MO(1)"
    );
}

#[test]
fn test_too_many_pairs_in_header() {
    let mut report = [0u8; RAW_EPSIZE];
    report[1..7].copy_from_slice(&[0xA4, b'Q', b'M', b'V', b'1', 0x8B]);
    assert_eq!(
        protocol::decode(&report),
        Err(DecodeError::TooManyPairs(11))
    );
}
