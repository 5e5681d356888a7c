//! One open device interface and its background read worker

use super::backend::{
    DeviceHandle, HidBackend, OpenError, ReadError, ReadOutcome, ReportLengths, WriteError,
};
use super::cancel::CancelToken;
use super::device_name::{path_contains_port, DeviceIdentity};
use super::protocol::{self, Message};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Report id written into byte 0 of every output report
pub const OUTPUT_REPORT_ID: u8 = 0x00;

/// Identifier of a connection for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the read worker hands to its callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A report of positive length, in device order
    Report(Vec<u8>),
    /// The worker hit an unrecoverable error and stopped
    Failed(ReadError),
}

/// An open device interface.
///
/// Dropping a connection closes it.
pub struct Connection {
    id: ConnectionId,
    identity: DeviceIdentity,
    path: String,
    handle: Option<Arc<dyn DeviceHandle>>,
    lengths: ReportLengths,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl Connection {
    /// Open `path`. No retry; the caller decides when to try again.
    pub fn open(
        backend: &dyn HidBackend,
        id: ConnectionId,
        identity: DeviceIdentity,
        path: &str,
    ) -> Result<Self, OpenError> {
        let handle = backend.open(path)?;
        let lengths = handle.report_lengths();
        info!(
            "Connection {} open on {} ({}; in={} out={})",
            id, path, identity, lengths.input, lengths.output
        );
        Ok(Self {
            id,
            identity,
            path: path.to_string(),
            handle: Some(handle),
            lengths,
            cancel: CancelToken::new(),
            worker: None,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port_token(&self) -> Option<&str> {
        self.identity.port()
    }

    pub fn report_lengths(&self) -> ReportLengths {
        self.lengths
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// `path` belongs to the same physical device as this connection
    pub fn matches_path(&self, path: &str) -> bool {
        self.port_token()
            .is_some_and(|port| path_contains_port(path, port))
    }

    /// Spawn the read worker. Returns false if one is already running or
    /// the connection is closed.
    ///
    /// `on_event` runs on the worker thread and blocks the next read.
    pub fn start_read_loop<F>(&mut self, mut on_event: F) -> bool
    where
        F: FnMut(ReadEvent) + Send + 'static,
    {
        if self.worker.is_some() {
            warn!("Connection {} already has a read worker", self.id);
            return false;
        }
        let Some(handle) = self.handle.clone() else {
            return false;
        };

        let cancel = self.cancel.clone();
        let id = self.id;
        let input_len = self.lengths.input.max(1);
        let spawned = thread::Builder::new()
            .name(format!("hid-read-{}", id.0))
            .spawn(move || {
                debug!("Read worker for {} started", id);
                let mut buf = vec![0u8; input_len];
                loop {
                    match handle.read(&mut buf, &cancel) {
                        Ok(ReadOutcome::Data(n)) if n > 0 => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            on_event(ReadEvent::Report(buf[..n].to_vec()));
                        }
                        Ok(ReadOutcome::Data(_)) | Ok(ReadOutcome::Idle) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                        }
                        Ok(ReadOutcome::Cancelled) => break,
                        Err(e) => {
                            if !cancel.is_cancelled() {
                                error!("Read worker for {} failed: {}", id, e);
                                on_event(ReadEvent::Failed(e));
                            }
                            break;
                        }
                    }
                }
                debug!("Read worker for {} stopped", id);
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                true
            }
            Err(e) => {
                error!("Failed to spawn read worker for {}: {}", self.id, e);
                false
            }
        }
    }

    /// Write a report. `report[0]` is overwritten with the report id and the
    /// buffer is zero-padded to the output report length.
    pub fn write(&self, report: &[u8]) -> bool {
        match self.try_write(report) {
            Ok(()) => true,
            Err(e) => {
                warn!("Write on connection {} failed: {}", self.id, e);
                false
            }
        }
    }

    /// Encode `message` into an output report and write it
    pub fn send(&self, message: &Message) -> bool {
        match protocol::encode_report(message, self.lengths.output) {
            Ok(report) => self.write(&report),
            Err(e) => {
                warn!("Cannot encode message for connection {}: {}", self.id, e);
                false
            }
        }
    }

    fn try_write(&self, report: &[u8]) -> Result<(), WriteError> {
        let handle = self.handle.as_ref().ok_or(WriteError::NotOpen)?;
        let max = self.lengths.output;
        if report.len() > max {
            return Err(WriteError::TooLong {
                len: report.len(),
                max,
            });
        }
        let mut buf = vec![0u8; max];
        buf[..report.len()].copy_from_slice(report);
        if let Some(first) = buf.first_mut() {
            *first = OUTPUT_REPORT_ID;
        }
        let written = handle.write(&buf)?;
        if written < buf.len() {
            return Err(WriteError::Io(format!(
                "short write: {} of {} bytes",
                written,
                buf.len()
            )));
        }
        Ok(())
    }

    /// Cancel the worker, wait for it, release the handle. Idempotent.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // Closed from its own callback; the loop exits on return.
                debug!("Connection {} closed from its read worker", self.id);
            } else if worker.join().is_err() {
                error!("Read worker for {} panicked", self.id);
            }
        }
        if self.handle.take().is_some() {
            info!("Connection {} closed", self.id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
