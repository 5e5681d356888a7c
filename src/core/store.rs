//! Persistence of known devices and user preferences

use crate::hid::catalog::DeviceDescriptor;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const DEVICES_FILE: &str = "devices.json";
const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not determine the data directory")]
    NoDataDir,
}

/// User preferences kept between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Last layer reported by the keyboard firmware
    #[serde(default)]
    pub cur_layer: u8,
    #[serde(default = "default_show_time")]
    pub show_time_ms: u64,
    #[serde(default = "default_true")]
    pub show_layer_switch: bool,
    /// Popup position (x, y)
    #[serde(default)]
    pub window_pos: (i32, i32),
    /// Raw path of the device whose layer drives the tray icon
    #[serde(default)]
    pub tray_device: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_show_time() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            cur_layer: 0,
            show_time_ms: default_show_time(),
            show_layer_switch: true,
            window_pos: (0, 0),
            tray_device: None,
            timestamp: Utc::now(),
        }
    }
}

/// Load/save collaborator for the device catalog and preferences.
///
/// Calls are synchronous and may block.
pub trait Store: Send + Sync {
    fn load_devices(&self) -> Result<Vec<DeviceDescriptor>, StoreError>;
    fn save_devices(&self, devices: &[DeviceDescriptor]) -> Result<(), StoreError>;
    fn load_preferences(&self) -> Result<Preferences, StoreError>;
    fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError>;
}

/// JSON files in a data directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the platform data directory
    pub fn open_default() -> Result<Self, StoreError> {
        let dirs = ProjectDirs::from("org", "qmk", "hid-tray").ok_or(StoreError::NoDataDir)?;
        Ok(Self::new(dirs.data_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.dir.join(name);
        if !path.exists() {
            debug!("{:?} does not exist, using defaults", path);
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Json { path, source })
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(name);
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, content).map_err(|source| StoreError::Io { path, source })
    }
}

impl Store for FileStore {
    fn load_devices(&self) -> Result<Vec<DeviceDescriptor>, StoreError> {
        self.read(DEVICES_FILE)
    }

    fn save_devices(&self, devices: &[DeviceDescriptor]) -> Result<(), StoreError> {
        self.write(DEVICES_FILE, devices)
    }

    fn load_preferences(&self) -> Result<Preferences, StoreError> {
        self.read(PREFERENCES_FILE)
    }

    fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.write(PREFERENCES_FILE, preferences)
    }
}

/// Non-persistent store, used by `--ephemeral` and tests
#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<DeviceDescriptor>>,
    preferences: Mutex<Preferences>,
}

impl Store for MemoryStore {
    fn load_devices(&self) -> Result<Vec<DeviceDescriptor>, StoreError> {
        Ok(self.devices.lock().clone())
    }

    fn save_devices(&self, devices: &[DeviceDescriptor]) -> Result<(), StoreError> {
        *self.devices.lock() = devices.to_vec();
        Ok(())
    }

    fn load_preferences(&self) -> Result<Preferences, StoreError> {
        Ok(self.preferences.lock().clone())
    }

    fn save_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        *self.preferences.lock() = preferences.clone();
        Ok(())
    }
}
