//! CLI Entry Point for dose-logger
//!
//! Provides command-line interface for:
//! - Listing serial ports
//! - Identifying configured dose-rate meters
//! - Polling them at a fixed cadence into CSV
//!
//! # Usage
//!
//! ```bash
//! dose-logger ports
//! dose-logger identify --config meters.toml
//! dose-logger poll --config meters.toml --interval-ms 500 --output dose.csv
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `info`) so CSV on stdout stays clean.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_bin::{run_poll, DeviceRegistry, LoggerConfig, PollOptions};
use daq_core::reading::unix_now;
use serialport::SerialPortType;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dose-logger")]
#[command(about = "Poll PRM-9000 and RadEye G20 dose-rate meters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports visible to the OS
    Ports,

    /// Build every configured device and print its verification string
    Identify {
        /// Device configuration file (TOML format)
        #[arg(long)]
        config: PathBuf,
    },

    /// Poll every configured device and write CSV rows
    Poll {
        /// Device configuration file (TOML format)
        #[arg(long)]
        config: PathBuf,

        /// Override poll_interval_ms from the config file
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many rounds (default: until Ctrl-C)
        #[arg(long)]
        count: Option<u64>,

        /// CSV output file (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let time_offset = unix_now();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Identify { config } => identify(&config, time_offset).await,
        Commands::Poll {
            config,
            interval_ms,
            count,
            output,
        } => poll(&config, interval_ms, count, output, time_offset).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let kind = match port.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "USB {:04x}:{:04x} {}",
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{}\t{}", port.port_name, kind.trim_end());
    }
    Ok(())
}

async fn build_registry(config_path: &Path, time_offset: f64) -> Result<(LoggerConfig, DeviceRegistry)> {
    let config = LoggerConfig::load_from(config_path)?;
    let mut registry = DeviceRegistry::with_default_factories();
    registry
        .build_all(&config.devices, time_offset)
        .await
        .context("Failed to build devices")?;
    Ok((config, registry))
}

async fn identify(config_path: &Path, time_offset: f64) -> Result<()> {
    let (_, registry) = build_registry(config_path, time_offset).await?;

    for device in registry.devices() {
        let state = if device.meter.is_connected().await {
            "open"
        } else {
            "unavailable"
        };
        println!(
            "{}\t{}\t{}\t{}",
            device.id,
            device.driver_name,
            state,
            device.meter.verification_string()
        );
        for warning in device.meter.take_warnings() {
            tracing::warn!(device = %device.id, "{}", warning);
        }
    }

    registry.close_all().await;
    Ok(())
}

async fn poll(
    config_path: &Path,
    interval_ms: Option<u64>,
    count: Option<u64>,
    output: Option<PathBuf>,
    time_offset: f64,
) -> Result<()> {
    let (config, registry) = build_registry(config_path, time_offset).await?;

    let interval = match interval_ms {
        Some(0) => anyhow::bail!("--interval-ms must be at least 1"),
        Some(ms) => Duration::from_millis(ms),
        None => config.poll_interval(),
    };

    let sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut out = csv::Writer::from_writer(sink);

    tracing::info!(
        devices = registry.devices().len(),
        interval_ms = interval.as_millis() as u64,
        "Polling started"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = run_poll(
        registry.devices(),
        &mut out,
        PollOptions { interval, count },
        shutdown,
    )
    .await;

    registry.close_all().await;
    let rounds = result?;
    out.flush().context("Failed to flush CSV output")?;
    tracing::info!("Polling finished after {} round(s)", rounds);
    Ok(())
}
