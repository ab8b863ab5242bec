//! Castlink CLI - cast receiver discovery from the command line.
//!
//! Runs discovery against the local network and prints every device-list
//! change as one JSON line on stdout. Logs go to stderr.

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castlink_core::{
    Device, DeviceRegistry, LoggingEventEmitter, MdnsScanner, ScanController, ScanListener,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;

use crate::config::CliConfig;

/// Castlink - discover cast receivers on the local network.
#[derive(Parser, Debug)]
#[command(name = "castlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CASTLINK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan for receivers and print device-list changes as JSON lines.
    Scan {
        /// Stop after this many seconds (overrides config file).
        #[arg(short, long, value_name = "SECS")]
        duration: Option<u64>,
    },
}

/// One line of scan output.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ScanLine<'a> {
    Online { device: &'a Device },
    Offline {
        #[serde(rename = "deviceId")]
        device_id: &'a str,
    },
    Devices { devices: &'a [Device] },
}

/// Prints registry notifications to stdout.
struct JsonLinePrinter;

impl JsonLinePrinter {
    fn print(&self, line: &ScanLine<'_>) {
        match serde_json::to_string(line) {
            Ok(json) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{}", json).and_then(|()| stdout.flush()) {
                    log::warn!("Failed to write scan output: {}", e);
                }
            }
            Err(e) => log::warn!("Failed to serialize scan output: {}", e),
        }
    }
}

impl ScanListener for JsonLinePrinter {
    fn device_online(&self, device: &Device) {
        log::info!("Found {} ({}) at {}", device.friendly_name, device.id, device.ip_address);
        self.print(&ScanLine::Online { device });
    }

    fn device_offline(&self, device_id: &str) {
        log::info!("Lost {}", device_id);
        self.print(&ScanLine::Offline { device_id });
    }

    fn devices_changed(&self, devices: &[Device]) {
        self.print(&ScanLine::Devices { devices });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Castlink v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        CliConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Scan { duration } => {
            if let Some(secs) = duration {
                config.scan_duration_secs = Some(secs);
            }
            run_scan(config).await
        }
    }
}

async fn run_scan(config: CliConfig) -> Result<()> {
    log::info!(
        "Configuration: service_type={}, stale_after={}s, prune_interval={}s",
        config.service_type,
        config.stale_after_secs,
        config.prune_interval_secs
    );

    let registry = Arc::new(DeviceRegistry::new(Arc::new(LoggingEventEmitter)));
    registry.set_listener(Some(Arc::new(JsonLinePrinter)));

    let scanner = Arc::new(MdnsScanner::with_service_type(config.service_type.clone()));
    let controller = ScanController::new(
        scanner,
        Arc::clone(&registry),
        config.stale_after(),
        config.prune_interval(),
    );

    controller
        .start_scan()
        .await
        .context("Failed to start discovery")?;

    match config.scan_duration_secs {
        Some(secs) => {
            log::info!("Scanning for {}s (Ctrl+C to stop early)", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    log::info!("Scan duration elapsed");
                }
                _ = shutdown_signal() => {
                    log::info!("Shutdown signal received");
                }
            }
        }
        None => {
            log::info!("Scanning until Ctrl+C");
            shutdown_signal().await;
            log::info!("Shutdown signal received");
        }
    }

    let found = registry.len();
    controller.stop_scan().await;
    log::info!("Scan stopped ({} device(s) known at shutdown)", found);
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
