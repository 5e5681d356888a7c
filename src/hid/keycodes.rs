//! QMK keycode naming
//!
//! Turns the 16-bit keycodes reported by the firmware into short labels for
//! logs and notifications ("Ctrl+A", "MO(2)", "LT(1, Space)").

/// QMK modifier bits (upper byte of a modified keycode)
const MOD_CTL: u16 = 0x0100;
const MOD_SFT: u16 = 0x0200;
const MOD_ALT: u16 = 0x0400;
const MOD_GUI: u16 = 0x0800;
/// Set when the modifier bits refer to the right-hand modifiers
const MOD_RIGHT: u16 = 0x1000;

const QK_MODS: u16 = 0x0100;
const QK_MODS_MAX: u16 = 0x1FFF;
const QK_MOD_TAP: u16 = 0x2000;
const QK_MOD_TAP_MAX: u16 = 0x3FFF;
const QK_LAYER_TAP: u16 = 0x4000;
const QK_LAYER_TAP_MAX: u16 = 0x4FFF;
const QK_TO: u16 = 0x5200;
const QK_MOMENTARY: u16 = 0x5220;
const QK_DEF_LAYER: u16 = 0x5240;
const QK_TOGGLE_LAYER: u16 = 0x5260;
const QK_ONE_SHOT_LAYER: u16 = 0x5280;
const QK_LAYER_TAP_TOGGLE: u16 = 0x52C0;

/// Basic keycodes (USB HID usage ids) and their labels
static BASIC_KEYS: &[(u8, &str)] = &[
    (0x00, "None"),
    (0x01, "Transparent"),
    (0x04, "A"),
    (0x05, "B"),
    (0x06, "C"),
    (0x07, "D"),
    (0x08, "E"),
    (0x09, "F"),
    (0x0A, "G"),
    (0x0B, "H"),
    (0x0C, "I"),
    (0x0D, "J"),
    (0x0E, "K"),
    (0x0F, "L"),
    (0x10, "M"),
    (0x11, "N"),
    (0x12, "O"),
    (0x13, "P"),
    (0x14, "Q"),
    (0x15, "R"),
    (0x16, "S"),
    (0x17, "T"),
    (0x18, "U"),
    (0x19, "V"),
    (0x1A, "W"),
    (0x1B, "X"),
    (0x1C, "Y"),
    (0x1D, "Z"),
    (0x1E, "1"),
    (0x1F, "2"),
    (0x20, "3"),
    (0x21, "4"),
    (0x22, "5"),
    (0x23, "6"),
    (0x24, "7"),
    (0x25, "8"),
    (0x26, "9"),
    (0x27, "0"),
    (0x28, "Enter"),
    (0x29, "Esc"),
    (0x2A, "Backspace"),
    (0x2B, "Tab"),
    (0x2C, "Space"),
    (0x2D, "-"),
    (0x2E, "="),
    (0x2F, "["),
    (0x30, "]"),
    (0x31, "\\"),
    (0x33, ";"),
    (0x34, "'"),
    (0x35, "`"),
    (0x36, ","),
    (0x37, "."),
    (0x38, "/"),
    (0x39, "Caps Lock"),
    (0x46, "Print Screen"),
    (0x47, "Scroll Lock"),
    (0x48, "Pause"),
    (0x49, "Insert"),
    (0x4A, "Home"),
    (0x4B, "Page Up"),
    (0x4C, "Delete"),
    (0x4D, "End"),
    (0x4E, "Page Down"),
    (0x4F, "Right"),
    (0x50, "Left"),
    (0x51, "Down"),
    (0x52, "Up"),
    (0x53, "Num Lock"),
    (0x54, "KP /"),
    (0x55, "KP *"),
    (0x56, "KP -"),
    (0x57, "KP +"),
    (0x58, "KP Enter"),
    (0x63, "KP ."),
    (0x65, "Menu"),
    (0x7A, "Undo"),
    (0x7B, "Cut"),
    (0x7C, "Copy"),
    (0x7D, "Paste"),
    (0x7E, "Find"),
    (0xA8, "Mute"),
    (0xA9, "Volume Up"),
    (0xAA, "Volume Down"),
    (0xAB, "Next Track"),
    (0xAC, "Previous Track"),
    (0xAD, "Stop"),
    (0xAE, "Play/Pause"),
    (0xBD, "Brightness Up"),
    (0xBE, "Brightness Down"),
    (0xE0, "Left Ctrl"),
    (0xE1, "Left Shift"),
    (0xE2, "Left Alt"),
    (0xE3, "Left GUI"),
    (0xE4, "Right Ctrl"),
    (0xE5, "Right Shift"),
    (0xE6, "Right Alt"),
    (0xE7, "Right GUI"),
];

/// Label of a basic (8-bit) keycode
pub fn basic_name(code: u8) -> Option<String> {
    match code {
        // F1..F12 and F13..F24 are contiguous blocks
        0x3A..=0x45 => Some(format!("F{}", code - 0x3A + 1)),
        0x68..=0x73 => Some(format!("F{}", code - 0x68 + 13)),
        0x59..=0x61 => Some(format!("KP {}", code - 0x59 + 1)),
        0x62 => Some("KP 0".to_string()),
        _ => BASIC_KEYS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| name.to_string()),
    }
}

/// Modifier set carried in bits 8..=12 of a keycode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub gui: bool,
    /// Right-hand variants
    pub right: bool,
}

impl KeyModifiers {
    /// Decode from QMK modifier bits (5-bit field, already shifted to bit 8)
    pub fn from_modifier_bits(bits: u16) -> Self {
        Self {
            ctrl: bits & MOD_CTL != 0,
            shift: bits & MOD_SFT != 0,
            alt: bits & MOD_ALT != 0,
            gui: bits & MOD_GUI != 0,
            right: bits & MOD_RIGHT != 0,
        }
    }

    pub fn to_modifier_bits(self) -> u16 {
        let mut bits = 0u16;
        if self.ctrl {
            bits |= MOD_CTL;
        }
        if self.shift {
            bits |= MOD_SFT;
        }
        if self.alt {
            bits |= MOD_ALT;
        }
        if self.gui {
            bits |= MOD_GUI;
        }
        if self.right && bits != 0 {
            bits |= MOD_RIGHT;
        }
        bits
    }

    pub fn is_empty(&self) -> bool {
        !(self.ctrl || self.shift || self.alt || self.gui)
    }

    /// "Ctrl+Shift+" style prefix, "R" marks right-hand modifiers
    pub fn display_prefix(&self) -> String {
        let side = if self.right { "R" } else { "" };
        let gui = if cfg!(target_os = "macos") { "Cmd" } else { "Win" };
        [
            (self.ctrl, "Ctrl"),
            (self.shift, "Shift"),
            (self.alt, "Alt"),
            (self.gui, gui),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| format!("{}{}+", side, name))
        .collect()
    }
}

/// Compose a modified keycode
pub fn compose_keycode(base: u8, mods: KeyModifiers) -> u16 {
    u16::from(base) | mods.to_modifier_bits()
}

/// Split a keycode into modifiers and base code
pub fn decompose_keycode(keycode: u16) -> (KeyModifiers, u8) {
    let mods = KeyModifiers::from_modifier_bits(keycode & 0x1F00);
    (mods, (keycode & 0x00FF) as u8)
}

fn base_label(code: u8) -> String {
    basic_name(code).unwrap_or_else(|| format!("0x{:02X}", code))
}

/// Human readable label for any keycode the firmware reports
pub fn key_name(keycode: u16) -> String {
    match keycode {
        0x0000..=0x00FF => base_label(keycode as u8),
        QK_MODS..=QK_MODS_MAX => {
            let (mods, base) = decompose_keycode(keycode);
            format!("{}{}", mods.display_prefix(), base_label(base))
        }
        QK_MOD_TAP..=QK_MOD_TAP_MAX => {
            let (mods, base) = decompose_keycode(keycode);
            let held = mods.display_prefix();
            format!("MT({}, {})", held.trim_end_matches('+'), base_label(base))
        }
        QK_LAYER_TAP..=QK_LAYER_TAP_MAX => {
            let layer = (keycode >> 8) & 0x0F;
            format!("LT({}, {})", layer, base_label((keycode & 0xFF) as u8))
        }
        QK_TO..=0x521F => format!("TO({})", keycode & 0x1F),
        QK_MOMENTARY..=0x523F => format!("MO({})", keycode & 0x1F),
        QK_DEF_LAYER..=0x525F => format!("DF({})", keycode & 0x1F),
        QK_TOGGLE_LAYER..=0x527F => format!("TG({})", keycode & 0x1F),
        QK_ONE_SHOT_LAYER..=0x529F => format!("OSL({})", keycode & 0x1F),
        QK_LAYER_TAP_TOGGLE..=0x52DF => format!("TT({})", keycode & 0x1F),
        _ => format!("0x{:04X}", keycode),
    }
}
