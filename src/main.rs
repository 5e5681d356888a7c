//! hid-tray - keeps QMK foot switches and button decks connected

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hid_tray::core::events::{self, AppEvent};
use hid_tray::core::runtime::run_event_loop;
use hid_tray::core::store::{FileStore, MemoryStore, Preferences, Store};
use hid_tray::hid::catalog::DeviceCatalog;
use hid_tray::hid::device_name::DeviceIdentity;
use hid_tray::hid::{
    ArrivalOutcome, HidApiBackend, HidBackend, HotplugController, HotplugWatcher, Message,
    MessageKey,
};
use hid_tray::notify::{DesktopNotifier, LogNotifier, Notifier};
use hid_tray::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hid-tray", about = "Layer indicator and hot-plug daemon for QMK HID devices")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long layer notifications stay visible, in milliseconds
    #[arg(long)]
    show_time_ms: Option<u64>,

    /// Keep the device catalog and preferences in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,
    /// Show known devices
    List {
        /// Include disabled devices
        #[arg(long)]
        all: bool,
    },
    /// Show present HID interfaces and how they would be handled
    Scan,
    /// Auto-open a known device on arrival
    Enable { path: String },
    /// Stop auto-opening a known device
    Disable { path: String },
    /// Remove a known device from the catalog
    Forget { path: String },
    /// Send one message to a supported device and exit
    Send {
        /// Instance path as shown by `scan`
        path: String,
        #[arg(long, value_parser = parse_number)]
        layer: Option<u16>,
        /// Keycode, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_number)]
        keycode: Option<u16>,
        #[arg(long, value_parser = parse_number)]
        led_state: Option<u16>,
    },
}

fn parse_number(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(show_time_ms) = cli.show_time_ms {
        config.display.show_time_ms = show_time_ms;
    }

    let store: Arc<dyn Store> = if cli.ephemeral {
        Arc::new(MemoryStore::default())
    } else {
        Arc::new(FileStore::open_default()?)
    };
    let mut catalog = DeviceCatalog::load(config.supported_devices(), Arc::clone(&store));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, catalog, store),
        Commands::List { all } => {
            print_catalog(&catalog, all);
            Ok(())
        }
        Commands::Scan => scan(&config, &catalog),
        Commands::Enable { path } => toggle(&mut catalog, &path, true),
        Commands::Disable { path } => toggle(&mut catalog, &path, false),
        Commands::Forget { path } => match catalog.remove(&path) {
            Some(removed) => {
                println!("Forgot {} ({})", removed.display_name, removed.raw_device_path);
                Ok(())
            }
            None => anyhow::bail!("No known device matches {}", path),
        },
        Commands::Send {
            path,
            layer,
            keycode,
            led_state,
        } => {
            let mut message = Message::new();
            for (key, value) in [
                (MessageKey::Layer, layer),
                (MessageKey::Keycode, keycode),
                (MessageKey::LedState, led_state),
            ] {
                if let Some(value) = value {
                    message = message.with(key, value)?;
                }
            }
            if message.is_empty() {
                anyhow::bail!("Nothing to send: pass --layer, --keycode or --led-state");
            }
            send(&config, catalog, &path, &message)
        }
    }
}

fn run(config: Config, catalog: DeviceCatalog, store: Arc<dyn Store>) -> Result<()> {
    info!("Starting hid-tray");

    let mut preferences = store.load_preferences().unwrap_or_else(|e| {
        warn!("Failed to load preferences, using defaults: {}", e);
        Preferences::default()
    });
    preferences.show_time_ms = config.display.show_time_ms;
    preferences.show_layer_switch = config.display.show_layer_switch;

    let backend: Arc<dyn HidBackend> =
        Arc::new(HidApiBackend::new().context("Failed to initialize HID API")?);

    let notifier: Arc<dyn Notifier> = if config.display.desktop_notifications {
        Arc::new(DesktopNotifier::new("hid-tray", config.display.show_time()))
    } else {
        Arc::new(LogNotifier::default())
    };
    notifier.update_icon(preferences.cur_layer);

    let (event_sender, event_rx) = events::channel();
    let controller = Arc::new(HotplugController::new(
        Arc::clone(&backend),
        catalog,
        notifier,
        event_sender.clone(),
        &config.display,
    ));

    let mut watcher =
        HotplugWatcher::start(backend, event_sender.clone(), config.hid.poll_interval())
            .context("Failed to start hot-plug watcher")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let shutdown = event_sender.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                let _ = shutdown.send(AppEvent::Shutdown);
            }
        });
        run_event_loop(Arc::clone(&controller), event_rx).await;
    });

    watcher.stop();

    preferences.cur_layer = controller.announced_layer();
    preferences.timestamp = Utc::now();
    if let Err(e) = store.save_preferences(&preferences) {
        warn!("Failed to save preferences: {}", e);
    }

    info!("hid-tray stopped");
    Ok(())
}

fn print_catalog(catalog: &DeviceCatalog, all: bool) {
    let devices = catalog.list(!all);
    if devices.is_empty() {
        println!("No known devices");
        return;
    }
    for device in devices {
        println!(
            "{} [{}] {:04X}:{:04X}{} {}",
            device.display_name,
            if device.active { "active" } else { "disabled" },
            device.vendor_id,
            device.product_id,
            device.interface.as_deref().unwrap_or(""),
            device.protocol.as_str()
        );
        println!("    path: {}", device.raw_device_path);
        println!(
            "    {} / {} / serial {}",
            device.manufacturer.as_deref().unwrap_or("?"),
            device.product.as_deref().unwrap_or("?"),
            device.serial_number.as_deref().unwrap_or("?")
        );
        println!("    last seen {}", device.last_seen.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

fn scan(config: &Config, catalog: &DeviceCatalog) -> Result<()> {
    let backend = HidApiBackend::new()?;
    for device in backend.enumerate()? {
        let identity = DeviceIdentity::parse(&device.path);
        let verdict = if let Some(known) = catalog.find_by_path(&device.path) {
            if known.active {
                format!("known: {}", known.display_name)
            } else {
                format!("known, disabled: {}", known.display_name)
            }
        } else if !identity.is_actionable() {
            "ignored".to_string()
        } else {
            match catalog.find_supported(device.vendor_id, device.product_id) {
                Some(s) if identity.has_interface(s.interface.as_deref()) => {
                    format!("supported: {}", s.name)
                }
                Some(s) => format!("other interface of {}", s.name),
                None => "unsupported".to_string(),
            }
        };
        println!(
            "{:04X}:{:04X} {:<32} {}",
            device.vendor_id, device.product_id, verdict, device.path
        );
    }
    Ok(())
}

fn send(config: &Config, catalog: DeviceCatalog, path: &str, message: &Message) -> Result<()> {
    let backend: Arc<dyn HidBackend> = Arc::new(HidApiBackend::new()?);
    let (event_sender, _event_rx) = events::channel();
    let controller = HotplugController::new(
        backend,
        catalog,
        Arc::new(LogNotifier::default()),
        event_sender,
        &config.display,
    );

    let result = match controller.handle_arrival(path) {
        ArrivalOutcome::Connected(id) | ArrivalOutcome::AlreadyConnected(id) => {
            if controller.send(id, message) {
                println!("Sent {}", message);
                Ok(())
            } else {
                Err(anyhow::anyhow!("Write to {} failed", path))
            }
        }
        ArrivalOutcome::Ignored(reason) => Err(anyhow::anyhow!("{} ignored: {:?}", path, reason)),
        ArrivalOutcome::OpenFailed(e) => Err(anyhow::anyhow!("Cannot open {}: {}", path, e)),
    };
    controller.shutdown();
    result
}

fn toggle(catalog: &mut DeviceCatalog, path: &str, active: bool) -> Result<()> {
    if catalog.set_active(path, active) {
        println!("{} {}", if active { "Enabled" } else { "Disabled" }, path);
        Ok(())
    } else {
        anyhow::bail!("No known device matches {}", path)
    }
}
