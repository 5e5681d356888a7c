//! HID module - device paths, catalog, wire protocol, connections and hot-plug

pub mod backend;
pub mod cancel;
pub mod catalog;
pub mod connection;
pub mod device_name;
pub mod hotplug;
pub mod keycodes;
pub mod protocol;
pub mod sinks;
pub mod watcher;

pub use backend::{HidApiBackend, HidBackend};
pub use catalog::{DeviceCatalog, DeviceDescriptor, ProtocolType, SupportedDevice};
pub use connection::{Connection, ConnectionId, ReadEvent};
pub use device_name::DeviceIdentity;
pub use hotplug::{ArrivalOutcome, HotplugController};
pub use protocol::{Message, MessageKey};
pub use watcher::HotplugWatcher;
