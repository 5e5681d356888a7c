//! Scripted backend, recording notifier and helpers shared by the tests

use hid_tray::core::config::DisplayConfig;
use hid_tray::core::events::{self, AppEvent};
use hid_tray::core::store::{MemoryStore, Store};
use hid_tray::hid::backend::{
    BackendError, DeviceHandle, EnumeratedDevice, OpenError, ReadError, ReadOutcome,
    ReportLengths, WriteError,
};
use hid_tray::hid::cancel::CancelToken;
use hid_tray::hid::catalog::{builtin_supported, DeviceCatalog};
use hid_tray::hid::protocol::RAW_EPSIZE;
use hid_tray::hid::HotplugController;
use hid_tray::notify::{IconHint, Notifier};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

pub const GUID: &str = "{4d1e55b2-f16f-11cf-88cb-001111000030}";
pub const PORT: &str = "1a2b&3c4d&0&0001";

/// Foot switch interface `mi` on the shared test port
pub fn footswitch_path(mi: &str) -> String {
    format!(r"\\?\HID#VID_35EE&PID_1308&MI_{}#{}#{}", mi, PORT, GUID)
}

pub fn ble_path() -> String {
    format!(
        r"\\?\HID#{{00001812-0000-1000-8000-00805f9b34fb}}_Dev_VID&0235ee_PID&1308_REV&0001#9&2d3d1c1e&0&0000#{}",
        GUID
    )
}

/// Replays scripted reads, then idles until cancelled
#[derive(Default)]
pub struct ScriptedHandle {
    pub reads: Mutex<VecDeque<Result<Vec<u8>, ReadError>>>,
    pub written: Mutex<Vec<Vec<u8>>>,
}

impl DeviceHandle for ScriptedHandle {
    fn report_lengths(&self) -> ReportLengths {
        ReportLengths {
            input: RAW_EPSIZE,
            output: RAW_EPSIZE,
        }
    }

    fn read(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<ReadOutcome, ReadError> {
        let next = self.reads.lock().pop_front();
        match next {
            Some(Ok(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(ReadOutcome::Data(data.len()))
            }
            Some(Err(e)) => Err(e),
            None => {
                if cancel.wait_timeout(Duration::from_millis(20)) {
                    Ok(ReadOutcome::Cancelled)
                } else {
                    Ok(ReadOutcome::Idle)
                }
            }
        }
    }

    fn write(&self, report: &[u8]) -> Result<usize, WriteError> {
        self.written.lock().push(report.to_vec());
        Ok(report.len())
    }
}

/// Backend listing a mutable set of foot switch interfaces
#[derive(Default)]
pub struct FakeBackend {
    pub present: Mutex<Vec<String>>,
    pub handles: Mutex<HashMap<String, Arc<ScriptedHandle>>>,
    pub opened: Mutex<Vec<String>>,
}

impl FakeBackend {
    /// Make `path` present and return the handle it will open with
    pub fn plug(&self, path: &str) -> Arc<ScriptedHandle> {
        self.present.lock().push(path.to_string());
        let handle = Arc::new(ScriptedHandle::default());
        self.handles
            .lock()
            .insert(path.to_string(), Arc::clone(&handle));
        handle
    }

    /// Take `path` off the enumeration list
    pub fn unplug(&self, path: &str) {
        self.present.lock().retain(|p| p != path);
        self.handles.lock().remove(path);
    }
}

impl hid_tray::hid::HidBackend for FakeBackend {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, BackendError> {
        Ok(self
            .present
            .lock()
            .iter()
            .map(|path| EnumeratedDevice {
                path: path.clone(),
                vendor_id: 0x35EE,
                product_id: 0x1308,
                serial_number: Some("FS-0001".to_string()),
                manufacturer: Some("QMK".to_string()),
                product: Some("Foot Switch".to_string()),
            })
            .collect())
    }

    fn open(&self, path: &str) -> Result<Arc<dyn DeviceHandle>, OpenError> {
        self.opened.lock().push(path.to_string());
        match self.handles.lock().get(path) {
            Some(handle) => Ok(Arc::clone(handle) as Arc<dyn DeviceHandle>),
            None => Err(OpenError::NotFound {
                path: path.to_string(),
                reason: "not plugged".to_string(),
            }),
        }
    }
}

/// Keeps every notification and icon update
#[derive(Default)]
pub struct RecordingNotifier {
    pub notes: Mutex<Vec<(String, String, IconHint)>>,
    pub icons: Mutex<Vec<u8>>,
}

impl RecordingNotifier {
    pub fn count(&self, message: &str) -> usize {
        self.notes
            .lock()
            .iter()
            .filter(|(_, m, _)| m == message)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str, icon: IconHint) {
        self.notes
            .lock()
            .push((title.to_string(), message.to_string(), icon));
    }

    fn update_icon(&self, layer: u8) {
        self.icons.lock().push(layer);
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub controller: Arc<HotplugController>,
    pub rx: UnboundedReceiver<AppEvent>,
}

pub fn harness() -> Harness {
    harness_with(DisplayConfig {
        layer_debounce_ms: 200,
        desktop_notifications: false,
        ..DisplayConfig::default()
    })
}

pub fn harness_with(display: DisplayConfig) -> Harness {
    let backend = Arc::new(FakeBackend::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::default());
    let catalog = DeviceCatalog::load(builtin_supported(), Arc::clone(&store) as Arc<dyn Store>);
    let (tx, rx) = events::channel();
    let controller = Arc::new(HotplugController::new(
        Arc::clone(&backend) as Arc<dyn hid_tray::hid::HidBackend>,
        catalog,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        tx,
        &display,
    ));
    Harness {
        backend,
        notifier,
        store,
        controller,
        rx,
    }
}

/// Next event from the channel, waiting up to five seconds
pub fn next_event(rx: &mut UnboundedReceiver<AppEvent>) -> AppEvent {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(event) = rx.try_recv() {
            return event;
        }
        assert!(Instant::now() < deadline, "no event within five seconds");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Poll `condition` for up to five seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// 64-byte input report announcing `layer`
pub fn layer_report(layer: u8) -> Vec<u8> {
    let mut report = vec![0u8; RAW_EPSIZE];
    report[1..9].copy_from_slice(&[0xA4, b'Q', b'M', b'V', b'1', 0x81, 0x02, layer]);
    report
}
