//! PRM-9000 Geiger-counter driver
//!
//! Protocol Overview:
//! - Format: the counter streams ASCII records on its own; nothing is sent
//! - Serial: 57600 baud, 8 data bits, no parity, 2 stop bits
//! - Record: four comma-separated fields, `<a>,<b>,<cpm>,CPM`
//! - Unit: counts per minute, converted to µSv/h with a fixed factor
//!   (default 0.002857 µSv/h per CPM)
//!
//! Records that do not have exactly four fields, or whose last field is not
//! `CPM` (case-insensitive), are skipped. A poll gives up after
//! `max_attempts` lines.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_dosimetry::Prm9000Factory;
//! use daq_core::driver::DriverFactory;
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//!     cpm_to_usv = 0.002857
//! };
//! let components = Prm9000Factory.build(config.into(), time_offset).await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{DoseRateMeter, Readable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::{DaqError, ReadError};
use daq_core::line_io::{BufferedPort, DynSerial, LineMode};
use daq_core::reading::{DoseRateUnit, ElapsedClock, WarningLog};
use daq_core::serial::{open_serial_async, SerialSettings, StopBits};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

const MODEL: &str = "PRM-9000";
const BAUD_RATE: u32 = 57600;

/// Default CPM to µSv/h conversion factor.
pub const DEFAULT_CPM_TO_USV: f64 = 0.002857;

/// Default number of lines examined per dose-rate poll.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

// =============================================================================
// Prm9000Factory - DriverFactory implementation
// =============================================================================

/// Configuration for PRM-9000 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Prm9000Config {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// µSv/h per count-per-minute
    #[serde(default = "default_cpm_to_usv")]
    pub cpm_to_usv: f64,
    /// Lines examined per poll before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Line assembly strategy
    #[serde(default)]
    pub line_mode: LineMode,
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cpm_to_usv() -> f64 {
    DEFAULT_CPM_TO_USV
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Prm9000Config {
    /// Defaults for everything but the port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            cpm_to_usv: DEFAULT_CPM_TO_USV,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            line_mode: LineMode::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Check values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.port.trim().is_empty() {
            return Err(DaqError::Configuration("PRM-9000 port must not be empty".into()));
        }
        if !self.cpm_to_usv.is_finite() || self.cpm_to_usv <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "PRM-9000 cpm_to_usv must be a positive number, got {}",
                self.cpm_to_usv
            )));
        }
        if self.max_attempts == 0 {
            return Err(DaqError::Configuration(
                "PRM-9000 max_attempts must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "PRM-9000 timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 57600 8-N-2 with the configured timeout.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(BAUD_RATE)
            .with_stop_bits(StopBits::Two)
            .with_timeout(self.timeout())
    }
}

/// Factory for creating PRM-9000 driver instances.
pub struct Prm9000Factory;

/// Static capabilities for PRM-9000
static PRM9000_CAPABILITIES: &[Capability] = &[Capability::Readable, Capability::DoseRateMeter];

impl DriverFactory for Prm9000Factory {
    fn driver_type(&self) -> &'static str {
        "prm9000"
    }

    fn name(&self) -> &'static str {
        "PRM-9000 Geiger Counter"
    }

    fn capabilities(&self) -> &'static [Capability] {
        PRM9000_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Prm9000Config = config.clone().try_into()?;
        cfg.validate()?;
        Ok(())
    }

    fn build(
        &self,
        config: toml::Value,
        time_offset: f64,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Prm9000Config = config.try_into().context("Invalid PRM-9000 config")?;
            cfg.validate()?;

            let driver = Arc::new(Prm9000Driver::new_async(time_offset, &cfg).await);

            Ok(DeviceComponents::new()
                .with_readable(driver.clone())
                .with_dose_rate_meter(driver)
                .with_metadata(DeviceMetadata {
                    model: Some(MODEL.to_string()),
                    measurement_units: Some(DoseRateUnit::MicroSievertPerHour),
                }))
        })
    }
}

// =============================================================================
// Record Parsing
// =============================================================================

/// Extract the CPM count from one record.
///
/// Returns `Ok(None)` for lines that are not CPM records at all, and
/// `Err(Malformed)` for a CPM record whose count field is not an integer.
pub fn parse_cpm_line(line: &str) -> Result<Option<i64>, ReadError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 4 || !fields[3].trim().eq_ignore_ascii_case("CPM") {
        return Ok(None);
    }
    fields[2]
        .trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|e| ReadError::malformed(line, format!("count field {:?}: {}", fields[2], e)))
}

// =============================================================================
// Prm9000Driver
// =============================================================================

/// Driver for the PRM-9000 Geiger counter.
///
/// Implements [`Readable`] and [`DoseRateMeter`]; values are in µSv/h.
pub struct Prm9000Driver {
    /// `None` once closed, or when the port never opened
    port: Mutex<Option<BufferedPort>>,
    timeout: Duration,
    line_mode: LineMode,
    cpm_to_usv: f64,
    max_attempts: u32,
    verification: String,
    clock: ElapsedClock,
    warnings: WarningLog,
}

impl Prm9000Driver {
    /// Open the configured port and identify the device.
    ///
    /// Never fails: when the port cannot be opened the driver is returned in
    /// a degraded state whose verification string holds the error text.
    pub async fn new_async(time_offset: f64, config: &Prm9000Config) -> Self {
        match open_serial_async(&config.port, config.serial_settings(), MODEL).await {
            Ok(stream) => Self::with_port(time_offset, config, Box::new(stream)).await,
            Err(e) => {
                let text = format!("{:#}", e);
                tracing::warn!(port = %config.port, "PRM-9000 unavailable: {}", text);
                Self::degraded(time_offset, config, text)
            }
        }
    }

    /// Identify the device on an already-open stream and take ownership of it.
    pub async fn with_port(time_offset: f64, config: &Prm9000Config, port: DynSerial) -> Self {
        let mut port = BufferedPort::new(port);
        let verification = identify(&mut port, config.timeout()).await;
        tracing::info!(port = %config.port, "PRM-9000 identified: {}", verification);

        Self {
            port: Mutex::new(Some(port)),
            ..Self::degraded(time_offset, config, verification)
        }
    }

    /// A driver without a port; every read returns [`ReadError::NotConnected`].
    pub fn degraded(time_offset: f64, config: &Prm9000Config, verification: String) -> Self {
        Self {
            port: Mutex::new(None),
            timeout: config.timeout(),
            line_mode: config.line_mode,
            cpm_to_usv: config.cpm_to_usv,
            max_attempts: config.max_attempts,
            verification,
            clock: ElapsedClock::new(time_offset),
            warnings: WarningLog::new(),
        }
    }

    /// Read one line and describe it, as done once at construction.
    ///
    /// Always uses [`LineMode::Line`], so a silent port gives `"no data"`
    /// after one timeout whatever the configured polling mode.
    pub async fn query_identification(&self) -> String {
        let mut guard = self.port.lock().await;
        match guard.as_mut() {
            Some(port) => identify(port, self.timeout).await,
            None => ReadError::NotConnected.to_string(),
        }
    }

    /// Conversion factor in use (µSv/h per CPM).
    pub fn cpm_to_usv(&self) -> f64 {
        self.cpm_to_usv
    }
}

async fn identify(port: &mut BufferedPort, timeout: Duration) -> String {
    match port.read_line(LineMode::Line, timeout).await {
        Ok(line) => {
            let line = line.trim();
            if line.is_empty() {
                "no data".to_string()
            } else {
                format!("first line: {}", line)
            }
        }
        Err(ReadError::NoData(_)) => "no data".to_string(),
        Err(e) => {
            tracing::warn!("PRM-9000 identification read failed: {}", e);
            e.to_string()
        }
    }
}

#[async_trait]
impl DoseRateMeter for Prm9000Driver {
    fn model(&self) -> &'static str {
        MODEL
    }

    fn unit(&self) -> DoseRateUnit {
        DoseRateUnit::MicroSievertPerHour
    }

    fn verification_string(&self) -> &str {
        &self.verification
    }

    fn clock(&self) -> &ElapsedClock {
        &self.clock
    }

    fn warning_log(&self) -> &WarningLog {
        &self.warnings
    }

    async fn is_connected(&self) -> bool {
        self.port.lock().await.is_some()
    }

    #[instrument(skip(self), err)]
    async fn read_dose_rate(&self) -> Result<f64, ReadError> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(ReadError::NotConnected)?;

        let mut worst: Option<ReadError> = None;
        for attempt in 1..=self.max_attempts {
            match port.read_line(self.line_mode, self.timeout).await {
                Ok(line) => {
                    let line = line.trim();
                    tracing::debug!(attempt, "PRM-9000 raw line: {:?}", line);
                    match parse_cpm_line(line) {
                        Ok(Some(cpm)) => return Ok(cpm as f64 * self.cpm_to_usv),
                        Ok(None) => {}
                        Err(e) => worst = Some(ReadError::most_informative(worst, e)),
                    }
                }
                Err(e) if !e.is_transient() => {
                    tracing::debug!(attempt, error = %e, "PRM-9000 stream unusable");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "PRM-9000 line read failed");
                    worst = Some(ReadError::most_informative(worst, e));
                }
            }
        }

        Err(match worst {
            Some(ReadError::NoData(_)) | None => ReadError::NoData(format!(
                "no CPM record in {} lines",
                self.max_attempts
            )),
            Some(e) => e,
        })
    }

    async fn close(&self) {
        if self.port.lock().await.take().is_some() {
            tracing::info!("PRM-9000 port closed");
        }
    }
}

#[async_trait]
impl Readable for Prm9000Driver {
    async fn read(&self) -> Result<f64> {
        Ok(self.read_dose_rate().await?)
    }
}
