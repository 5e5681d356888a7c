//! Configuration management

use crate::hid::catalog::SupportedDevice;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HID access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidConfig {
    /// Hot-plug polling period in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl HidConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// How long a layer popup stays visible
    #[serde(default = "default_show_time")]
    pub show_time_ms: u64,
    /// Announce layer switches
    #[serde(default = "default_true")]
    pub show_layer_switch: bool,
    /// Quiet period before a layer change is announced
    #[serde(default = "default_layer_debounce")]
    pub layer_debounce_ms: u64,
    /// Use desktop notifications instead of log lines
    #[serde(default = "default_true")]
    pub desktop_notifications: bool,
}

fn default_show_time() -> u64 {
    2000
}
fn default_layer_debounce() -> u64 {
    400
}
fn default_true() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_time_ms: default_show_time(),
            show_layer_switch: true,
            layer_debounce_ms: default_layer_debounce(),
            desktop_notifications: true,
        }
    }
}

impl DisplayConfig {
    pub fn show_time(&self) -> Duration {
        Duration::from_millis(self.show_time_ms)
    }

    pub fn layer_debounce(&self) -> Duration {
        Duration::from_millis(self.layer_debounce_ms)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HID access configuration
    #[serde(default)]
    pub hid: HidConfig,
    /// Display configuration
    #[serde(default)]
    pub display: DisplayConfig,
    /// Extra supported devices appended to the built-in list
    #[serde(default)]
    pub devices: Vec<SupportedDevice>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, defaults if it does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            // Return default config if file doesn't exist
            Ok(Config::default())
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "qmk", "hid-tray")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Get the default configuration embedded in the binary
    pub fn default_config_str() -> &'static str {
        include_str!("../../config/default.toml")
    }

    /// Built-in supported devices followed by the configured extras
    pub fn supported_devices(&self) -> Vec<SupportedDevice> {
        let mut supported = crate::hid::catalog::builtin_supported();
        supported.extend(self.devices.iter().cloned());
        supported
    }
}
