//! Per-device state shared between read handling and notifications

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

/// Layer and last key of one keyboard-firmware device
#[derive(Debug, Default)]
pub struct SharedDeviceState {
    current_layer: AtomicU8,
    last_keycode: AtomicU16,
}

impl SharedDeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self) -> u8 {
        self.current_layer.load(Ordering::SeqCst)
    }

    /// Store `layer`, returning the previous one
    pub fn set_layer(&self, layer: u8) -> u8 {
        self.current_layer.swap(layer, Ordering::SeqCst)
    }

    pub fn keycode(&self) -> u16 {
        self.last_keycode.load(Ordering::SeqCst)
    }

    pub fn set_keycode(&self, keycode: u16) {
        self.last_keycode.store(keycode, Ordering::SeqCst);
    }

    /// Zero the layer after the device went away
    pub fn reset_layer(&self) {
        self.current_layer.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            layer: self.layer(),
            keycode: self.keycode(),
        }
    }
}

/// Plain copy of [`SharedDeviceState`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub layer: u8,
    pub keycode: u16,
}
