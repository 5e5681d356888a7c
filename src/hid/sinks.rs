//! Per-protocol interpretation of input reports

use super::catalog::ProtocolType;
use super::protocol::{self, DecodeError, Message, MessageKey};
use crate::core::state::SharedDeviceState;
use std::sync::Arc;
use tracing::debug;

/// Offset of the first button byte in a button deck report (report id included)
pub const BUTTON_STATE_OFFSET: usize = 4;

/// Number of buttons reported by a button deck
pub const BUTTON_COUNT: usize = 15;

/// What a sink made of one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Nothing worth reporting
    Ignored,
    /// Button bitmask changed (bit n = button n pressed)
    Buttons { pressed: u16, previous: u16 },
    /// Firmware message decoded and applied to the shared state
    Firmware {
        message: Message,
        /// New layer, only when it differs from the previous one
        layer_changed: Option<u8>,
        keycode: Option<u16>,
    },
    /// Report could not be decoded; the connection stays open
    Malformed(DecodeError),
}

/// Interprets the reports of one connection
pub trait ReportSink: Send {
    fn protocol(&self) -> ProtocolType;
    fn handle(&mut self, report: &[u8]) -> SinkOutcome;
}

/// Sink for `protocol`, feeding `state` for keyboard firmware devices
pub fn sink_for(protocol: ProtocolType, state: Arc<SharedDeviceState>) -> Box<dyn ReportSink> {
    match protocol {
        ProtocolType::ButtonDeck => Box::new(ButtonDeckSink::default()),
        ProtocolType::KeyboardFirmware => Box::new(KeyboardFirmwareSink::new(state)),
        ProtocolType::None => Box::new(NullSink),
    }
}

/// Fixed-offset button bitmask, no codec involved
#[derive(Debug, Default)]
pub struct ButtonDeckSink {
    last: u16,
}

impl ButtonDeckSink {
    fn bitmask(report: &[u8]) -> u16 {
        report
            .iter()
            .skip(BUTTON_STATE_OFFSET)
            .take(BUTTON_COUNT)
            .enumerate()
            .filter(|(_, state)| **state != 0)
            .fold(0u16, |mask, (i, _)| mask | (1 << i))
    }
}

impl ReportSink for ButtonDeckSink {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::ButtonDeck
    }

    fn handle(&mut self, report: &[u8]) -> SinkOutcome {
        let pressed = Self::bitmask(report);
        if pressed == self.last {
            return SinkOutcome::Ignored;
        }
        let previous = std::mem::replace(&mut self.last, pressed);
        SinkOutcome::Buttons { pressed, previous }
    }
}

/// QMV1 messages from QMK firmware
pub struct KeyboardFirmwareSink {
    state: Arc<SharedDeviceState>,
}

impl KeyboardFirmwareSink {
    pub fn new(state: Arc<SharedDeviceState>) -> Self {
        Self { state }
    }
}

impl ReportSink for KeyboardFirmwareSink {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::KeyboardFirmware
    }

    fn handle(&mut self, report: &[u8]) -> SinkOutcome {
        let message = match protocol::decode(report) {
            Ok(message) => message,
            Err(e) => return SinkOutcome::Malformed(e),
        };
        debug!("Firmware message: {}", message);

        // Layers are 0..=255; a larger value is corrupt, not a layer.
        let layer = match message.value_for(MessageKey::Layer).map(u8::try_from) {
            Some(Err(_)) => {
                return SinkOutcome::Malformed(DecodeError::BadFormat("layer out of range"))
            }
            Some(Ok(layer)) => Some(layer),
            None => None,
        };

        let keycode = message.value_for(MessageKey::Keycode);
        if let Some(keycode) = keycode {
            self.state.set_keycode(keycode);
        }

        let layer_changed = layer.filter(|layer| self.state.set_layer(*layer) != *layer);

        SinkOutcome::Firmware {
            message,
            layer_changed,
            keycode,
        }
    }
}

/// Devices with no known protocol: reports are dropped
pub struct NullSink;

impl ReportSink for NullSink {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::None
    }

    fn handle(&mut self, _report: &[u8]) -> SinkOutcome {
        SinkOutcome::Ignored
    }
}
