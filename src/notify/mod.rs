//! Notification collaborator - desktop toasts and layer indicator

mod debounce;

pub use debounce::Debouncer;

use notify_rust::{Notification, Timeout};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Severity shown next to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconHint {
    Info,
    Warning,
    Error,
}

impl IconHint {
    fn icon_name(&self) -> &'static str {
        match self {
            IconHint::Info => "dialog-information",
            IconHint::Warning => "dialog-warning",
            IconHint::Error => "dialog-error",
        }
    }
}

/// Fire-and-forget sink for user-visible events
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, icon: IconHint);

    /// Show `layer` on the indicator icon
    fn update_icon(&self, layer: u8);
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier {
    layer: Mutex<Option<u8>>,
}

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, icon: IconHint) {
        match icon {
            IconHint::Info => info!("{} {}", title, message),
            IconHint::Warning | IconHint::Error => warn!("{} {}", title, message),
        }
    }

    fn update_icon(&self, layer: u8) {
        let mut current = self.layer.lock();
        if *current != Some(layer) {
            info!("Indicator layer: {}", layer);
            *current = Some(layer);
        }
    }
}

/// Desktop notifications through the platform notification service
pub struct DesktopNotifier {
    app_name: String,
    show_time: Duration,
    fallback: LogNotifier,
}

impl DesktopNotifier {
    pub fn new(app_name: &str, show_time: Duration) -> Self {
        Self {
            app_name: app_name.to_string(),
            show_time,
            fallback: LogNotifier::default(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str, icon: IconHint) {
        let timeout = u32::try_from(self.show_time.as_millis()).unwrap_or(u32::MAX);
        let shown = Notification::new()
            .appname(&self.app_name)
            .summary(title)
            .body(message)
            .icon(icon.icon_name())
            .timeout(Timeout::Milliseconds(timeout))
            .show();
        if let Err(e) = shown {
            warn!("Desktop notification failed: {}", e);
            self.fallback.notify(title, message, icon);
        }
    }

    fn update_icon(&self, layer: u8) {
        self.fallback.update_icon(layer);
    }
}
