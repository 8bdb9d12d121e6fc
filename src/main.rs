//! PC Volume MQTT
//!
//! Exposes the PC master volume to Home Assistant over MQTT.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pc_volume_mqtt::audio::AudioBackend;
use pc_volume_mqtt::bridge::{BridgeHandle, StateBridge};
use pc_volume_mqtt::config::{self, TerminalPrompter};
use pc_volume_mqtt::installer;
use pc_volume_mqtt::mqtt::RumqttConnector;
use pc_volume_mqtt::paths::AppPaths;
use pc_volume_mqtt::tray::TrayCommand;

/// How long the bridge gets to stop producing and flush its session
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// PC Volume MQTT - control the PC master volume from Home Assistant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: resolved per install mode)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Remove autostart registration and delete the executable
    #[arg(long)]
    uninstall: bool,

    /// Register autostart and the uninstall entry, then exit
    #[arg(long)]
    install: bool,

    /// Run without the system tray icon
    #[arg(long)]
    no_tray: bool,

    /// Extra topic segment for multi-device setups; the bridge still follows
    /// the default output device
    #[arg(long, env = "DEVICE_NAME")]
    device_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect(args.config.as_deref());

    // Leaves nothing behind in the data directory
    if args.uninstall {
        let _ = init_logging(&args.log_level, None)?;
        installer::uninstall()?;
        info!("PC Volume MQTT uninstalled");
        return Ok(());
    }

    paths.ensure_directories()?;
    let _log_guard = init_logging(&args.log_level, Some(&paths.logs_dir))?;

    info!("Starting PC Volume MQTT v{}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Data directory: {} ({})",
        paths.base_dir().display(),
        if paths.is_portable { "portable" } else { "installed" }
    );

    if args.install {
        installer::register()?;
        info!("PC Volume MQTT registered for autostart");
        return Ok(());
    }
    if let Err(e) = installer::register() {
        warn!("⚠️ Autostart registration failed: {:#}", e);
    }

    // Precondition gate: complete config before any network activity
    let mut prompter = TerminalPrompter::new();
    let mut config = config::load_or_init(&paths, &mut prompter).await?;
    if let Some(device) = args.device_name.filter(|d| !d.trim().is_empty()) {
        config.device_name = Some(device);
    }

    let topics = config.topics();
    info!(
        machine = %topics.machine_name,
        state = %topics.state_topic,
        command = %topics.command_topic,
        "Configuration loaded"
    );

    let backend = create_backend()?;
    info!("Audio backend: {}", backend.name());

    let connector = RumqttConnector::new(config.session_settings());
    let (bridge, mut task) = StateBridge::spawn(topics, backend, connector);

    let (tray_tx, mut tray_rx) = mpsc::unbounded_channel();
    let tray = if config.tray.enabled && !args.no_tray {
        start_tray(&bridge, tray_tx)
    } else {
        debug!("System tray disabled");
        None
    };

    let finished = tokio::select! {
        result = &mut task => Some(result),
        _ = shutdown_signal() => None,
        Some(TrayCommand::Shutdown) = tray_rx.recv() => {
            info!("Exit requested from the tray");
            None
        }
    };

    let outcome = match finished {
        Some(result) => result,
        None => {
            bridge.shutdown();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Bridge did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                    task.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    if let Some(tray) = tray {
        tray.join().await;
    }

    outcome.context("Bridge task panicked")??;
    info!("PC Volume MQTT shutdown complete");
    Ok(())
}

/// Stderr logging, plus a daily file when `logs_dir` is given
fn init_logging(level: &str, logs_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match logs_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "pc-volume-mqtt.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

#[cfg(windows)]
fn create_backend() -> Result<Arc<dyn AudioBackend>> {
    let backend = pc_volume_mqtt::audio::wasapi::WasapiBackend::new()
        .context("Failed to initialize Windows Core Audio")?;
    Ok(Arc::new(backend))
}

#[cfg(not(windows))]
fn create_backend() -> Result<Arc<dyn AudioBackend>> {
    warn!("⚠️ No native audio backend on this platform, using a simulated output device");
    Ok(Arc::new(pc_volume_mqtt::audio::SimulatedBackend::with_device(
        "simulated",
        "Simulated Output",
        50.0,
    )))
}

/// Threads backing the tray icon
struct TrayThreads {
    ui: std::thread::JoinHandle<()>,
    commands: std::thread::JoinHandle<()>,
}

impl TrayThreads {
    /// Wait for the tray to remove its icon
    async fn join(self) {
        let joined = tokio::task::spawn_blocking(move || {
            let _ = self.ui.join();
            let _ = self.commands.join();
        });
        if tokio::time::timeout(Duration::from_secs(2), joined).await.is_err() {
            warn!("Tray thread did not exit in time");
        }
    }
}

#[cfg(windows)]
fn start_tray(
    bridge: &BridgeHandle,
    exit_tx: mpsc::UnboundedSender<TrayCommand>,
) -> Option<TrayThreads> {
    use pc_volume_mqtt::tray::{spawn_command_listener, TrayManager, TrayMessageHandler};

    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let (command_tx, command_rx) = crossbeam::channel::unbounded();

    let ui = std::thread::Builder::new()
        .name("tray-ui".to_string())
        .spawn(move || {
            if let Err(e) = TrayManager::new(update_rx, command_tx).run() {
                warn!("System tray failed: {:#}", e);
            }
        });
    let ui = match ui {
        Ok(ui) => ui,
        Err(e) => {
            warn!("Could not start tray thread: {}", e);
            return None;
        }
    };

    let commands = match spawn_command_listener(command_rx, exit_tx) {
        Ok(commands) => commands,
        Err(e) => {
            warn!("Could not start tray command thread: {}", e);
            return None;
        }
    };

    tokio::spawn(TrayMessageHandler::new(update_tx, bridge.subscribe_status()).run());
    debug!("System tray started");
    Some(TrayThreads { ui, commands })
}

#[cfg(not(windows))]
fn start_tray(
    _bridge: &BridgeHandle,
    _exit_tx: mpsc::UnboundedSender<TrayCommand>,
) -> Option<TrayThreads> {
    debug!("System tray is only available on Windows");
    None
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
