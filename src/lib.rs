//! HID Tray
//!
//! Keeps live connections to QMK foot switches and button decks over raw HID.
//!
//! # Features
//! - Matches hot-plugged HID interfaces against a catalog of supported devices
//! - One background read worker per connection, cancellable at any time
//! - Decodes the `QMV1` firmware message format (layer, keycode, LED state)
//! - Announces layer changes after a quiet period
//! - Remembers discovered devices and preferences between runs

pub mod core;
pub mod hid;
pub mod notify;

pub use core::config::Config;
pub use core::events::AppEvent;
pub use core::store::{FileStore, MemoryStore, Preferences, Store};
pub use hid::HotplugController;
