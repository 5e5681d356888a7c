//! Hot-plug handling: maps arrival/removal paths onto live connections

use super::backend::{EnumeratedDevice, HidBackend};
use super::catalog::{DeviceCatalog, DeviceDescriptor, ProtocolType};
use super::connection::{Connection, ConnectionId, ReadEvent};
use super::device_name::DeviceIdentity;
use super::keycodes::key_name;
use super::protocol::Message;
use super::sinks::{sink_for, ReportSink, SinkOutcome};
use crate::core::config::DisplayConfig;
use crate::core::events::{AppEvent, EventSender};
use crate::core::state::{SharedDeviceState, StateSnapshot};
use crate::notify::{Debouncer, IconHint, Notifier};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DEVICE_READY: &str = "Device ready";
const DEVICE_NOT_READY: &str = "Device not ready";
const DEVICE_UNPLUGGED: &str = "Device unplugged";
const CONNECTION_LOST: &str = "Device connection lost";
const MALFORMED_DATA: &str = "Wrong data from the USB Device";

/// Why an arrival did not lead to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No vendor/product id in the path
    NotHid,
    /// Bluetooth LE devices are not handled
    Bluetooth,
    /// Vendor/product pair is not in the supported list
    Unsupported,
    /// Supported device, but not the interface we talk to
    WrongInterface,
    /// Known device that the operator disabled
    Inactive,
    /// Enumeration does not list the path
    NotEnumerated,
}

/// Result of [`HotplugController::handle_arrival`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalOutcome {
    Ignored(IgnoreReason),
    /// Another interface of an already connected device
    AlreadyConnected(ConnectionId),
    Connected(ConnectionId),
    OpenFailed(String),
}

/// A connection together with its descriptor, sink and shared state
pub struct LiveDevice {
    pub connection: Connection,
    pub descriptor: DeviceDescriptor,
    pub state: Arc<SharedDeviceState>,
    sink: Box<dyn ReportSink>,
}

/// The set of live connections
#[derive(Default)]
pub struct DeviceRegistry {
    live: Vec<LiveDevice>,
}

impl DeviceRegistry {
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn position_by_path(&self, path: &str) -> Option<usize> {
        self.live.iter().position(|d| {
            d.connection.path().eq_ignore_ascii_case(path) || d.connection.matches_path(path)
        })
    }

    /// Live device whose port token is contained in `path`
    pub fn find_by_path(&self, path: &str) -> Option<&LiveDevice> {
        self.position_by_path(path).map(|i| &self.live[i])
    }

    pub fn get(&self, id: ConnectionId) -> Option<&LiveDevice> {
        self.live.iter().find(|d| d.connection.id() == id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut LiveDevice> {
        self.live.iter_mut().find(|d| d.connection.id() == id)
    }

    fn insert(&mut self, device: LiveDevice) {
        self.live.push(device);
    }

    fn remove_by_path(&mut self, path: &str) -> Option<LiveDevice> {
        let index = self.position_by_path(path)?;
        Some(self.live.remove(index))
    }

    fn remove(&mut self, id: ConnectionId) -> Option<LiveDevice> {
        let index = self.live.iter().position(|d| d.connection.id() == id)?;
        Some(self.live.remove(index))
    }

    fn drain(&mut self) -> Vec<LiveDevice> {
        std::mem::take(&mut self.live)
    }
}

/// Summary of a live device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub id: ConnectionId,
    pub name: String,
    pub path: String,
    pub protocol: ProtocolType,
    pub state: StateSnapshot,
}

struct LayerChange {
    device: String,
    layer: u8,
}

/// Reacts to arrival, removal and report events.
///
/// All methods are meant to be called from one consumer task; the locks
/// guard against the read workers and the debounce thread.
pub struct HotplugController {
    backend: Arc<dyn HidBackend>,
    catalog: Mutex<DeviceCatalog>,
    registry: Mutex<DeviceRegistry>,
    notifier: Arc<dyn Notifier>,
    events: EventSender,
    layer_announcer: Debouncer<LayerChange>,
    announced_layer: Arc<AtomicU8>,
    next_id: AtomicU64,
}

fn status_title(name: &str) -> String {
    format!("{} Device Status:", name)
}

impl HotplugController {
    pub fn new(
        backend: Arc<dyn HidBackend>,
        catalog: DeviceCatalog,
        notifier: Arc<dyn Notifier>,
        events: EventSender,
        display: &DisplayConfig,
    ) -> Self {
        let announced_layer = Arc::new(AtomicU8::new(0));
        let layer_announcer = {
            let notifier = Arc::clone(&notifier);
            let announced = Arc::clone(&announced_layer);
            let show_layer_switch = display.show_layer_switch;
            Debouncer::new("layer", display.layer_debounce(), move |change: LayerChange| {
                announced.store(change.layer, Ordering::SeqCst);
                notifier.update_icon(change.layer);
                if show_layer_switch {
                    notifier.notify(
                        &status_title(&change.device),
                        &format!("Layer {}", change.layer),
                        IconHint::Info,
                    );
                }
            })
        };

        Self {
            backend,
            catalog: Mutex::new(catalog),
            registry: Mutex::new(DeviceRegistry::default()),
            notifier,
            events,
            layer_announcer,
            announced_layer,
            next_id: AtomicU64::new(1),
        }
    }

    /// Handle an OS arrival notification for `path`
    pub fn handle_arrival(&self, path: &str) -> ArrivalOutcome {
        let identity = DeviceIdentity::parse(path);
        if identity.bluetooth_le {
            debug!("Ignoring BLE device {}", path);
            return ArrivalOutcome::Ignored(IgnoreReason::Bluetooth);
        }
        let Some((vendor_id, product_id)) = identity.ids() else {
            debug!("Ignoring non-HID path {}", path);
            return ArrivalOutcome::Ignored(IgnoreReason::NotHid);
        };

        let mut registry = self.registry.lock();
        if let Some(live) = registry.find_by_path(path) {
            debug!(
                "{} already connected as {}, ignoring {}",
                live.descriptor.display_name,
                live.connection.id(),
                path
            );
            return ArrivalOutcome::AlreadyConnected(live.connection.id());
        }

        let mut catalog = self.catalog.lock();
        let descriptor = if let Some(known) = catalog.find_by_path(path).cloned() {
            if !known.active {
                debug!("{} is disabled, not opening", known.raw_device_path);
                return ArrivalOutcome::Ignored(IgnoreReason::Inactive);
            }
            let mut known = known;
            match self.current_interface(&known) {
                Some(device) => {
                    if !device.path.eq_ignore_ascii_case(&known.raw_device_path) {
                        info!("{} moved to {}", known.display_name, device.path);
                    }
                    known.refresh_from(&device);
                    catalog.upsert(known.clone());
                }
                None => debug!(
                    "{} not enumerated, trying stored path",
                    known.display_name
                ),
            }
            known
        } else {
            let Some(support) = catalog.find_supported(vendor_id, product_id).cloned() else {
                debug!("Unsupported device {} at {}", identity, path);
                return ArrivalOutcome::Ignored(IgnoreReason::Unsupported);
            };
            if !identity.has_interface(support.interface.as_deref()) {
                debug!(
                    "{}: interface {:?} is not {:?}",
                    support.name, identity.interface, support.interface
                );
                return ArrivalOutcome::Ignored(IgnoreReason::WrongInterface);
            }
            let Some(device) = self.enumerated(path) else {
                debug!("{} is not enumerated, skipping", path);
                return ArrivalOutcome::Ignored(IgnoreReason::NotEnumerated);
            };
            let descriptor = DeviceDescriptor::discovered(&support, &device);
            catalog.upsert(descriptor.clone());
            descriptor
        };
        drop(catalog);

        self.connect(&mut registry, descriptor)
    }

    fn enumerated(&self, path: &str) -> Option<EnumeratedDevice> {
        self.enumerate_matching(|d| d.path.eq_ignore_ascii_case(path))
    }

    /// Present interface of a known device. After a replug the OS node,
    /// and with it the path, may differ from the stored one.
    fn current_interface(&self, known: &DeviceDescriptor) -> Option<EnumeratedDevice> {
        self.enumerate_matching(|d| known.is_interface_path(&d.path))
    }

    fn enumerate_matching(
        &self,
        matches: impl Fn(&EnumeratedDevice) -> bool,
    ) -> Option<EnumeratedDevice> {
        match self.backend.enumerate() {
            Ok(devices) => devices.into_iter().find(|d| matches(d)),
            Err(e) => {
                warn!("Enumeration failed: {}", e);
                None
            }
        }
    }

    fn connect(&self, registry: &mut DeviceRegistry, descriptor: DeviceDescriptor) -> ArrivalOutcome {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let path = descriptor.raw_device_path.clone();
        let title = status_title(&descriptor.display_name);

        let mut connection =
            match Connection::open(&*self.backend, id, DeviceIdentity::parse(&path), &path) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Failed to open {}: {}", descriptor.display_name, e);
                    self.notifier.notify(&title, DEVICE_NOT_READY, IconHint::Warning);
                    return ArrivalOutcome::OpenFailed(e.to_string());
                }
            };

        let events = self.events.clone();
        let started = connection.start_read_loop(move |event| {
            let _ = events.send(AppEvent::Read {
                connection: id,
                event,
            });
        });
        if !started {
            connection.close();
            self.notifier.notify(&title, DEVICE_NOT_READY, IconHint::Warning);
            return ArrivalOutcome::OpenFailed("read worker did not start".to_string());
        }

        let state = Arc::new(SharedDeviceState::new());
        let sink = sink_for(descriptor.protocol, Arc::clone(&state));
        info!(
            "{} connected as {} ({})",
            descriptor.display_name,
            id,
            descriptor.protocol.as_str()
        );
        registry.insert(LiveDevice {
            connection,
            descriptor,
            state,
            sink,
        });
        self.notifier.notify(&title, DEVICE_READY, IconHint::Info);
        ArrivalOutcome::Connected(id)
    }

    /// Handle an OS removal notification. Returns true if a connection closed.
    pub fn handle_removal(&self, path: &str) -> bool {
        let removed = self.registry.lock().remove_by_path(path);
        let Some(mut live) = removed else {
            debug!("No live connection for removed path {}", path);
            return false;
        };
        live.connection.close();
        live.state.reset_layer();
        self.clear_layer();
        info!("{} unplugged", live.descriptor.display_name);
        self.notifier.notify(
            &status_title(&live.descriptor.display_name),
            DEVICE_UNPLUGGED,
            IconHint::Info,
        );
        true
    }

    /// Handle output of a read worker
    pub fn handle_read_event(&self, id: ConnectionId, event: ReadEvent) -> SinkOutcome {
        match event {
            ReadEvent::Report(bytes) => self.handle_report(id, &bytes),
            ReadEvent::Failed(e) => {
                let removed = self.registry.lock().remove(id);
                if let Some(mut live) = removed {
                    error!("{} lost: {}", live.descriptor.display_name, e);
                    live.connection.close();
                    live.state.reset_layer();
                    self.clear_layer();
                    self.notifier.notify(
                        &status_title(&live.descriptor.display_name),
                        CONNECTION_LOST,
                        IconHint::Error,
                    );
                }
                SinkOutcome::Ignored
            }
        }
    }

    /// Interpret one report from connection `id`
    pub fn handle_report(&self, id: ConnectionId, report: &[u8]) -> SinkOutcome {
        let (name, outcome) = {
            let mut registry = self.registry.lock();
            let Some(live) = registry.get_mut(id) else {
                debug!("Report for closed connection {}", id);
                return SinkOutcome::Ignored;
            };
            (live.descriptor.display_name.clone(), live.sink.handle(report))
        };

        match &outcome {
            SinkOutcome::Ignored => {}
            SinkOutcome::Buttons { pressed, previous } => {
                info!("{} buttons {:015b} (was {:015b})", name, pressed, previous);
            }
            SinkOutcome::Firmware {
                layer_changed,
                keycode,
                ..
            } => {
                if let Some(keycode) = keycode {
                    debug!("{} key {}", name, key_name(*keycode));
                }
                if let Some(layer) = layer_changed {
                    self.layer_announcer.trigger(LayerChange {
                        device: name,
                        layer: *layer,
                    });
                }
            }
            SinkOutcome::Malformed(e) => {
                warn!("{} sent malformed data: {}", name, e);
                self.notifier
                    .notify(&status_title(&name), MALFORMED_DATA, IconHint::Warning);
            }
        }
        outcome
    }

    /// Encode and send `message` to connection `id`
    pub fn send(&self, id: ConnectionId, message: &Message) -> bool {
        self.registry
            .lock()
            .get(id)
            .is_some_and(|live| live.connection.send(message))
    }

    /// Drop a layer change still waiting out the debounce window and show
    /// the base layer again
    fn clear_layer(&self) {
        self.layer_announcer.cancel();
        self.announced_layer.store(0, Ordering::SeqCst);
        self.notifier.update_icon(0);
    }

    pub fn live_devices(&self) -> Vec<DeviceStatus> {
        self.registry
            .lock()
            .live
            .iter()
            .map(|live| DeviceStatus {
                id: live.connection.id(),
                name: live.descriptor.display_name.clone(),
                path: live.connection.path().to_string(),
                protocol: live.descriptor.protocol,
                state: live.state.snapshot(),
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Layer most recently announced after debouncing
    pub fn announced_layer(&self) -> u8 {
        self.announced_layer.load(Ordering::SeqCst)
    }

    /// Run `f` against the catalog
    pub fn with_catalog<R>(&self, f: impl FnOnce(&mut DeviceCatalog) -> R) -> R {
        f(&mut self.catalog.lock())
    }

    /// Close every live connection without notifying
    pub fn shutdown(&self) {
        let devices = self.registry.lock().drain();
        for mut live in devices {
            live.connection.close();
        }
        info!("All connections closed");
    }
}

