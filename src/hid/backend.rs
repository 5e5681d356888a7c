//! Platform HID access behind a small trait seam
//!
//! [`HidApiBackend`] enumerates and reads report descriptors with `hidapi`,
//! and does device I/O through `async-hid` so a pending read can be raced
//! against cancellation. Tests substitute their own backend.

use super::cancel::CancelToken;
use async_hid::{AsyncHidRead, AsyncHidWrite, Device, DeviceId, DeviceReader, DeviceWriter};
use futures_lite::StreamExt;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use hidreport::{Report, ReportDescriptor};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Largest report descriptor we ask the OS for
const MAX_REPORT_DESCRIPTOR_SIZE: usize = 4096;

/// One HID interface currently present on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedDevice {
    /// `#`-delimited instance path
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Report byte lengths, report id byte included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLengths {
    pub input: usize,
    pub output: usize,
}

/// Result of a single read slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A report of this many bytes was placed in the buffer
    Data(usize),
    /// Nothing arrived in this slice
    Idle,
    /// The cancel token fired while waiting
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HID subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("device enumeration failed: {0}")]
    Enumerate(String),
}

#[derive(Debug, Clone, Error)]
pub enum OpenError {
    #[error("cannot open {path}: {reason}")]
    NotFound { path: String, reason: String },
    #[error("capability query failed for {path}: {reason}")]
    Capabilities { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("read failed: {0}")]
    Io(String),
    #[error("device disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("connection is closed")]
    NotOpen,
    #[error("report of {len} bytes exceeds output length {max}")]
    TooLong { len: usize, max: usize },
    #[error("write failed: {0}")]
    Io(String),
}

/// Source of present devices and opened handles
pub trait HidBackend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, BackendError>;

    /// Open the interface at `path` (as returned by [`HidBackend::enumerate`])
    fn open(&self, path: &str) -> Result<Arc<dyn DeviceHandle>, OpenError>;
}

/// An open device interface
pub trait DeviceHandle: Send + Sync {
    fn report_lengths(&self) -> ReportLengths;

    /// Wait for one input report or cancellation.
    ///
    /// `buf[0]` receives the report id, so for unnumbered reports it is 0.
    /// Must return `Cancelled` promptly once `cancel` fires.
    fn read(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<ReadOutcome, ReadError>;

    /// Write a full output report, report id in byte 0
    fn write(&self, report: &[u8]) -> Result<usize, WriteError>;
}

/// `hidapi` + `async-hid` backed implementation
pub struct HidApiBackend {
    api: Mutex<HidApi>,
    /// Synthesized instance path -> native hidapi path
    native_paths: Mutex<HashMap<String, CString>>,
}

impl HidApiBackend {
    pub fn new() -> Result<Self, BackendError> {
        let api = HidApi::new().map_err(|e| BackendError::Unavailable(e.to_string()))?;
        info!("HID API initialized");
        Ok(Self {
            api: Mutex::new(api),
            native_paths: Mutex::new(HashMap::new()),
        })
    }
}

impl HidBackend for HidApiBackend {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, BackendError> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| BackendError::Enumerate(e.to_string()))?;

        let mut native_paths = self.native_paths.lock();
        let mut devices = Vec::new();
        for info in api.device_list() {
            let native = info.path();
            let path = instance_path(
                &native.to_string_lossy(),
                info.vendor_id(),
                info.product_id(),
                info.interface_number(),
                &location_key(info),
            );
            native_paths.insert(path.clone(), native.to_owned());
            devices.push(EnumeratedDevice {
                path,
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                serial_number: info.serial_number().map(str::to_string),
                manufacturer: info.manufacturer_string().map(str::to_string),
                product: info.product_string().map(str::to_string),
            });
        }
        Ok(devices)
    }

    fn open(&self, path: &str) -> Result<Arc<dyn DeviceHandle>, OpenError> {
        let not_found = |reason: String| OpenError::NotFound {
            path: path.to_string(),
            reason,
        };
        let native = match self.native_paths.lock().get(path) {
            Some(native) => native.clone(),
            None => CString::new(path).map_err(|e| not_found(e.to_string()))?,
        };

        // The hidapi handle is only needed for the report descriptor.
        let caps = {
            let device = self
                .api
                .lock()
                .open_path(&native)
                .map_err(|e| not_found(e.to_string()))?;
            query_capabilities(&device).map_err(|reason| OpenError::Capabilities {
                path: path.to_string(),
                reason,
            })?
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hid-io")
            .enable_all()
            .build()
            .map_err(|e| not_found(e.to_string()))?;
        let native = native.to_string_lossy().into_owned();
        let (reader, writer) = runtime.block_on(open_async(&native)).map_err(not_found)?;
        debug!(
            "Opened {} (input {} bytes, output {} bytes, numbered={})",
            path, caps.lengths.input, caps.lengths.output, caps.numbered
        );

        Ok(Arc::new(HidApiHandle {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            caps,
            runtime: Some(runtime),
        }))
    }
}

/// Find the `async-hid` device behind a native hidapi path and open it
async fn open_async(native: &str) -> Result<(DeviceReader, DeviceWriter), String> {
    let devices: Vec<Device> = async_hid::HidBackend::default()
        .enumerate()
        .await
        .map_err(|e| e.to_string())?
        .collect::<Vec<Device>>()
        .await;
    let device = devices
        .into_iter()
        .find(|d| same_device(&d.id, native))
        .ok_or_else(|| format!("{} is not visible to async-hid", native))?;
    device.open().await.map_err(|e| e.to_string())
}

/// `async-hid` id and hidapi path name the same interface
fn same_device(id: &DeviceId, native: &str) -> bool {
    match id {
        // /sys/class/hidraw/hidrawN against /dev/hidrawN
        #[cfg(target_os = "linux")]
        DeviceId::DevPath(path) => path
            .file_name()
            .is_some_and(|name| Path::new(native).file_name() == Some(name)),
        #[cfg(target_os = "windows")]
        DeviceId::UncPath(path) => path.to_string().eq_ignore_ascii_case(native),
        // hidapi names IOKit services `DevSrvsID:<registry entry id>`
        #[cfg(target_os = "macos")]
        DeviceId::RegistryEntryId(entry) => {
            native.strip_prefix("DevSrvsID:") == Some(entry.to_string().as_str())
        }
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

struct Capabilities {
    lengths: ReportLengths,
    /// Input reports carry a report id byte on the wire
    numbered: bool,
}

fn query_capabilities(device: &HidDevice) -> Result<Capabilities, String> {
    let mut raw_descriptor = vec![0u8; MAX_REPORT_DESCRIPTOR_SIZE];
    let size = device
        .get_report_descriptor(&mut raw_descriptor)
        .map_err(|e| e.to_string())?;
    let descriptor =
        ReportDescriptor::try_from(&raw_descriptor[..size]).map_err(|e| format!("{:?}", e))?;

    let inputs = descriptor.input_reports();
    let input = inputs
        .iter()
        .map(report_byte_length)
        .max()
        .ok_or_else(|| "descriptor has no input reports".to_string())?;
    let output = descriptor
        .output_reports()
        .iter()
        .map(report_byte_length)
        .max()
        .unwrap_or(0);
    let numbered = inputs.iter().any(|r| r.report_id().is_some());

    Ok(Capabilities {
        lengths: ReportLengths { input, output },
        numbered,
    })
}

/// Byte length as the OS reports it: unnumbered reports gain a zero id byte
fn report_byte_length<R: Report>(report: &R) -> usize {
    let id_byte = if report.report_id().is_some() { 0 } else { 1 };
    report.size_in_bytes() + id_byte
}

struct HidApiHandle {
    reader: Mutex<DeviceReader>,
    writer: Mutex<DeviceWriter>,
    caps: Capabilities,
    /// Drives the async reads and writes; `None` only during drop
    runtime: Option<Runtime>,
}

impl HidApiHandle {
    fn runtime(&self) -> Result<&Runtime, String> {
        self.runtime
            .as_ref()
            .ok_or_else(|| "I/O runtime is gone".to_string())
    }
}

impl DeviceHandle for HidApiHandle {
    fn report_lengths(&self) -> ReportLengths {
        self.caps.lengths
    }

    fn read(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<ReadOutcome, ReadError> {
        if cancel.is_cancelled() {
            return Ok(ReadOutcome::Cancelled);
        }
        // Unnumbered reports arrive without their zero id; put it back.
        let offset = usize::from(!self.caps.numbered);
        if buf.len() <= offset {
            return Ok(ReadOutcome::Idle);
        }

        let runtime = self.runtime().map_err(ReadError::Io)?;
        let mut reader = self.reader.lock();
        let (head, payload) = buf.split_at_mut(offset);
        let read = runtime.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => None,
                read = reader.read_input_report(payload) => Some(read),
            }
        });

        match read {
            None => Ok(ReadOutcome::Cancelled),
            Some(Err(e)) => Err(ReadError::Io(e.to_string())),
            Some(Ok(0)) => Ok(ReadOutcome::Idle),
            Some(Ok(n)) => {
                if let Some(id) = head.first_mut() {
                    *id = 0;
                }
                Ok(ReadOutcome::Data(n + offset))
            }
        }
    }

    fn write(&self, report: &[u8]) -> Result<usize, WriteError> {
        let runtime = self.runtime().map_err(WriteError::Io)?;
        let mut writer = self.writer.lock();
        runtime
            .block_on(writer.write_output_report(report))
            .map_err(|e| WriteError::Io(e.to_string()))?;
        Ok(report.len())
    }
}

impl Drop for HidApiHandle {
    fn drop(&mut self) {
        // May run on a blocking-pool thread, where a blocking shutdown panics.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// USB device directory in a sysfs path, e.g. `1-2` or `3-1.4`
static SYSFS_USB_PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+(?:\.\d+)*$").unwrap());

/// Interface node name used by the libusb backend, e.g. `1-2:1.0`
static LIBUSB_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+-\d+(?:\.\d+)*):\d+\.\d+$").unwrap());

/// Physical USB port in a resolved sysfs device path
pub fn usb_port_from_sysfs(resolved: &Path) -> Option<String> {
    resolved
        .ancestors()
        .filter_map(|p| p.file_name())
        .map(|name| name.to_string_lossy())
        .find(|name| SYSFS_USB_PORT_RE.is_match(name))
        .map(|name| name.into_owned())
}

/// Key shared by every interface of one physical device, stable across
/// replugs into the same port.
///
/// Linux resolves the USB port through sysfs (hidraw) or reads it from the
/// node name (libusb). Elsewhere the serial number stands in when the device
/// has one; the native path is the last resort.
fn location_key(info: &DeviceInfo) -> String {
    let native = info.path().to_string_lossy();
    if let Some(port) = usb_port_of(&native) {
        return format!("usb:{}", port);
    }
    match info.serial_number().filter(|s| !s.is_empty()) {
        Some(serial) => format!(
            "serial:{:04x}:{:04x}:{}",
            info.vendor_id(),
            info.product_id(),
            serial
        ),
        None => format!("path:{}", native),
    }
}

fn usb_port_of(native: &str) -> Option<String> {
    if let Some(caps) = LIBUSB_PATH_RE.captures(native) {
        return Some(caps[1].to_string());
    }
    let node = native.strip_prefix("/dev/")?;
    let link = Path::new("/sys/class/hidraw").join(node).join("device");
    let resolved = std::fs::canonicalize(&link).ok()?;
    usb_port_from_sysfs(&resolved)
}

/// Instance path for an enumerated interface.
///
/// Windows paths already have the `HID#VID_..&PID_..#port#...` shape. Other
/// platforms get a synthesized one whose port token is derived from
/// `location`, so sibling interfaces share it.
pub fn instance_path(
    native: &str,
    vendor_id: u16,
    product_id: u16,
    interface: i32,
    location: &str,
) -> String {
    if cfg!(windows) || native.contains('#') {
        return native.to_string();
    }
    let iface = if interface >= 0 {
        format!("&MI_{:02X}", interface)
    } else {
        String::new()
    };
    format!(
        r"\\?\HID#VID_{:04X}&PID_{:04X}{}#{}#{}",
        vendor_id,
        product_id,
        iface,
        port_token_for(location),
        native
    )
}

/// Stable `hex&hex&hex&hex` token from a location key (FNV-1a)
fn port_token_for(location: &str) -> String {
    let hash = location
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    format!(
        "{:04x}&{:04x}&{:04x}&{:04x}",
        (hash >> 48) & 0xffff,
        (hash >> 32) & 0xffff,
        (hash >> 16) & 0xffff,
        hash & 0xffff
    )
}
