//! Parsing of `#`-delimited HID device instance paths
//!
//! A Windows HID interface path looks like
//! `\\?\HID#VID_35EE&PID_1308&MI_01#1a2b&3c4d&0&0001#{4d1e55b2-f16f-11cf-88cb-001111000030}`.
//! The identity fields are pulled out of it without touching the device.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Segment delimiter of an instance path
pub const PATH_DELIMITER: char = '#';

/// Index of the segment holding the port token
const PORT_SEGMENT: usize = 2;

static VID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)VID_([0-9A-F]{4})").unwrap());
static PID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)PID_([0-9A-F]{4})").unwrap());
static MI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)&MI_([0-9A-F]{2})").unwrap());

// BLE paths carry `VID&02046D`: a one-byte vendor source followed by the id.
static BLE_VID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)VID&(?:[0-9A-F]{2})?([0-9A-F]{4})").unwrap());
static BLE_PID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)PID&([0-9A-F]{4})").unwrap());

static UUID_BRACKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}")
        .unwrap()
});
static PORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]+&[0-9A-Fa-f]+&[0-9A-Fa-f]+&[0-9A-Fa-f]+$").unwrap()
});

/// Identity fields extracted from a device path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB vendor id
    pub vendor_id: Option<u16>,
    /// USB product id
    pub product_id: Option<u16>,
    /// Interface selector in the form `&MI_01`
    pub interface: Option<String>,
    /// Third path segment, kept exactly as found
    pub port_token: Option<String>,
    /// Path belongs to a Bluetooth LE device
    pub bluetooth_le: bool,
}

impl DeviceIdentity {
    /// Parse an instance path. Never fails: missing fields stay `None`.
    pub fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split(PATH_DELIMITER).collect();

        if segments
            .get(1)
            .is_some_and(|segment| UUID_BRACKET_RE.is_match(segment))
        {
            return Self {
                vendor_id: capture_hex(&BLE_VID_RE, path),
                product_id: capture_hex(&BLE_PID_RE, path),
                interface: None,
                port_token: None,
                bluetooth_le: true,
            };
        }

        let mut identity = Self::default();
        for segment in &segments {
            if identity.vendor_id.is_none() {
                identity.vendor_id = capture_hex(&VID_RE, segment);
            }
            if identity.product_id.is_none() {
                identity.product_id = capture_hex(&PID_RE, segment);
            }
            if identity.interface.is_none() {
                identity.interface = MI_RE
                    .captures(segment)
                    .map(|caps| format!("&MI_{}", caps[1].to_ascii_uppercase()));
            }
        }

        if let Some(port) = segments.get(PORT_SEGMENT).filter(|s| !s.is_empty()) {
            // Malformed tokens are kept; only a debug trace records them.
            if !is_valid_port(port) {
                debug!("Port token {:?} in {} is not hex&hex&hex&hex", port, path);
            }
            identity.port_token = Some(port.to_string());
        }

        identity
    }

    /// Both vendor and product ids were found
    pub fn is_regular_hid_device(&self) -> bool {
        self.vendor_id.is_some() && self.product_id.is_some()
    }

    /// The identity may be acted on: regular and not BLE
    pub fn is_actionable(&self) -> bool {
        self.is_regular_hid_device() && !self.bluetooth_le
    }

    /// `(vendor_id, product_id)` when both are present
    pub fn ids(&self) -> Option<(u16, u16)> {
        Some((self.vendor_id?, self.product_id?))
    }

    /// Case-insensitive check of the interface selector
    pub fn has_interface(&self, expected: Option<&str>) -> bool {
        match (self.interface.as_deref(), expected) {
            (None, None) => true,
            (Some(found), Some(expected)) => found.eq_ignore_ascii_case(expected),
            _ => false,
        }
    }

    /// The stored port token, if it is non-empty
    pub fn port(&self) -> Option<&str> {
        self.port_token.as_deref().filter(|p| !p.is_empty())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ids() {
            Some((vid, pid)) => write!(f, "{:04X}:{:04X}", vid, pid)?,
            None => write!(f, "????:????")?,
        }
        if let Some(iface) = &self.interface {
            write!(f, "{}", iface)?;
        }
        if self.bluetooth_le {
            write!(f, " (BLE)")?;
        }
        Ok(())
    }
}

/// Port token shape check: four `&`-separated hex groups
pub fn is_valid_port(token: &str) -> bool {
    PORT_RE.is_match(token)
}

/// Case-insensitive substring test used to fold interface notifications
/// of one physical device onto a single port token.
pub fn path_contains_port(path: &str, port: &str) -> bool {
    !port.is_empty() && path.to_ascii_lowercase().contains(&port.to_ascii_lowercase())
}

fn capture_hex(re: &Regex, haystack: &str) -> Option<u16> {
    re.captures(haystack)
        .and_then(|caps| u16::from_str_radix(&caps[1], 16).ok())
}
