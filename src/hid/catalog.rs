//! Supported device list and the persisted set of discovered devices

use super::backend::EnumeratedDevice;
use super::device_name::{path_contains_port, DeviceIdentity};
use crate::core::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How reports from a device are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    #[default]
    None,
    ButtonDeck,
    KeyboardFirmware,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::None => "none",
            ProtocolType::ButtonDeck => "button_deck",
            ProtocolType::KeyboardFirmware => "keyboard_firmware",
        }
    }
}

/// A device type the daemon knows how to talk to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedDevice {
    pub name: String,
    pub protocol: ProtocolType,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Expected interface selector (`&MI_01`), `None` for single-interface devices
    #[serde(default)]
    pub interface: Option<String>,
}

impl SupportedDevice {
    pub fn new(
        name: &str,
        protocol: ProtocolType,
        vendor_id: u16,
        product_id: u16,
        interface: Option<&str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            protocol,
            vendor_id,
            product_id,
            interface: interface.map(str::to_string),
        }
    }
}

/// Device types compiled into the daemon
pub fn builtin_supported() -> Vec<SupportedDevice> {
    vec![
        SupportedDevice::new(
            "FootSwitch",
            ProtocolType::KeyboardFirmware,
            0x35EE,
            0x1308,
            Some("&MI_01"),
        ),
        SupportedDevice::new("Stream Deck", ProtocolType::ButtonDeck, 0x0FD9, 0x0060, None),
        SupportedDevice::new("Stream Deck V2", ProtocolType::ButtonDeck, 0x0FD9, 0x006D, None),
    ]
}

/// One discovered physical device interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub display_name: String,
    pub protocol: ProtocolType,
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub interface: Option<String>,
    /// Auto-open this instance on arrival
    pub active: bool,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    pub raw_device_path: String,
    pub last_seen: DateTime<Utc>,
}

impl DeviceDescriptor {
    /// New active descriptor for an enumerated interface of a supported type
    pub fn discovered(support: &SupportedDevice, device: &EnumeratedDevice) -> Self {
        Self {
            display_name: support.name.clone(),
            protocol: support.protocol,
            vendor_id: support.vendor_id,
            product_id: support.product_id,
            interface: support.interface.clone(),
            active: true,
            serial_number: device.serial_number.clone(),
            manufacturer: device.manufacturer.clone(),
            product: device.product.clone(),
            raw_device_path: device.path.clone(),
            last_seen: Utc::now(),
        }
    }

    /// Port token of the stored path
    pub fn port_token(&self) -> Option<String> {
        DeviceIdentity::parse(&self.raw_device_path)
            .port()
            .map(str::to_string)
    }

    /// `path` contains this descriptor's port token (case-insensitive)
    pub fn matches_path(&self, path: &str) -> bool {
        self.port_token()
            .is_some_and(|port| path_contains_port(path, &port))
    }

    /// `path` is this descriptor's interface on the same physical device,
    /// possibly under a different OS node after a replug
    pub fn is_interface_path(&self, path: &str) -> bool {
        let identity = DeviceIdentity::parse(path);
        self.matches_path(path)
            && identity.ids() == Some((self.vendor_id, self.product_id))
            && identity.has_interface(self.interface.as_deref())
    }

    /// Same physical device and interface as `other`
    pub fn same_instance(&self, other: &DeviceDescriptor) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.interface.as_deref().map(str::to_ascii_uppercase)
                == other.interface.as_deref().map(str::to_ascii_uppercase)
            && match (self.port_token(), other.port_token()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
                _ => false,
            }
    }

    /// Take over the enumerated path and metadata, bump `last_seen`
    pub fn refresh_from(&mut self, device: &EnumeratedDevice) {
        self.raw_device_path = device.path.clone();
        self.serial_number = device.serial_number.clone();
        self.manufacturer = device.manufacturer.clone();
        self.product = device.product.clone();
        self.last_seen = Utc::now();
    }
}

/// Catalog of supported types plus known descriptors.
///
/// Holds the only in-memory copy of the descriptors; every change is
/// written through the [`Store`], failures are logged and ignored.
pub struct DeviceCatalog {
    supported: Vec<SupportedDevice>,
    known: Vec<DeviceDescriptor>,
    store: Arc<dyn Store>,
}

impl DeviceCatalog {
    /// Build the catalog, loading known descriptors from `store`
    pub fn load(supported: Vec<SupportedDevice>, store: Arc<dyn Store>) -> Self {
        let known = match store.load_devices() {
            Ok(devices) => {
                debug!("Loaded {} known devices", devices.len());
                devices
            }
            Err(e) => {
                warn!("Failed to load known devices, starting empty: {}", e);
                Vec::new()
            }
        };
        Self {
            supported,
            known,
            store,
        }
    }

    pub fn supported(&self) -> &[SupportedDevice] {
        &self.supported
    }

    pub fn find_supported(&self, vendor_id: u16, product_id: u16) -> Option<&SupportedDevice> {
        self.supported
            .iter()
            .find(|s| s.vendor_id == vendor_id && s.product_id == product_id)
    }

    /// First known descriptor whose port token is contained in `path`.
    ///
    /// A token that is a substring of another device's token can match the
    /// wrong entry; tokens are assumed distinct.
    pub fn find_by_path(&self, path: &str) -> Option<&DeviceDescriptor> {
        self.known.iter().find(|d| d.matches_path(path))
    }

    /// Insert or replace the descriptor with the same raw path or the same
    /// physical instance, then persist
    pub fn upsert(&mut self, descriptor: DeviceDescriptor) {
        match self.known.iter_mut().find(|d| {
            d.raw_device_path.eq_ignore_ascii_case(&descriptor.raw_device_path)
                || d.same_instance(&descriptor)
        }) {
            Some(existing) => *existing = descriptor,
            None => {
                info!(
                    "Registered {} at {}",
                    descriptor.display_name, descriptor.raw_device_path
                );
                self.known.push(descriptor);
            }
        }
        self.persist();
    }

    pub fn list(&self, active_only: bool) -> Vec<&DeviceDescriptor> {
        self.known
            .iter()
            .filter(|d| !active_only || d.active)
            .collect()
    }

    /// Toggle auto-open for the entry at `path`. Returns false if unknown.
    pub fn set_active(&mut self, path: &str, active: bool) -> bool {
        let Some(entry) = self.entry_mut(path) else {
            return false;
        };
        entry.active = active;
        self.persist();
        true
    }

    /// Drop the entry at `path` from the catalog
    pub fn remove(&mut self, path: &str) -> Option<DeviceDescriptor> {
        let index = self.index_of(path)?;
        let removed = self.known.remove(index);
        self.persist();
        Some(removed)
    }

    fn index_of(&self, path: &str) -> Option<usize> {
        self.known
            .iter()
            .position(|d| d.raw_device_path.eq_ignore_ascii_case(path))
            .or_else(|| self.known.iter().position(|d| d.matches_path(path)))
    }

    fn entry_mut(&mut self, path: &str) -> Option<&mut DeviceDescriptor> {
        let index = self.index_of(path)?;
        self.known.get_mut(index)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save_devices(&self.known) {
            warn!("Failed to persist device catalog: {}", e);
        }
    }
}
