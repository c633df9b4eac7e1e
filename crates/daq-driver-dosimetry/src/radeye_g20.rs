//! Thermo RadEye G20 gamma survey meter driver
//!
//! Protocol Overview:
//! - Serial: 9600 baud, 7 data bits, even parity, 2 stop bits
//! - Handshake: raw `@` answered by one byte, then `X1\r\n` (enable auto-send)
//!   answered by one line
//! - Identification: any line containing `FH41B2`
//! - Readings: `<2-char prefix><count> <rest>`, count in units of 10 nSv/h
//!
//! Example exchange:
//!
//! ```text
//! host   -> "@"
//! device <- 0x06
//! host   -> "X1\r\n"
//! device <- "OK\r\n"
//! device <- "OK123 CPM\r\n"     (123 -> 1230 nSv/h)
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{DoseRateMeter, Readable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::{DaqError, ReadError};
use daq_core::line_io::{BufferedPort, DynSerial, LineMode};
use daq_core::reading::{DoseRateUnit, ElapsedClock, WarningLog};
use daq_core::serial::{open_serial_async, DataBits, Parity, SerialSettings, StopBits};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

const MODEL: &str = "RadEye G20";
const BAUD_RATE: u32 = 9600;

/// Substring that identifies a G20 in its identification line.
pub const DEVICE_ID: &str = "FH41B2";

const HANDSHAKE_BYTE: &[u8] = b"@";
const AUTO_SEND_COMMAND: &[u8] = b"X1\r\n";
const HANDSHAKE_DELAY: Duration = Duration::from_millis(100);
const CLEAR_WINDOW: Duration = Duration::from_millis(20);

/// Reported counts are in units of 10 nSv/h.
const NSV_PER_COUNT: i64 = 10;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

// =============================================================================
// RadEyeG20Factory - DriverFactory implementation
// =============================================================================

/// Configuration for RadEye G20 driver
#[derive(Debug, Clone, Deserialize)]
pub struct RadEyeG20Config {
    /// Serial port path (e.g., "/dev/ttyUSB1")
    pub port: String,
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RadEyeG20Config {
    /// Default timeout on the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Check values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.port.trim().is_empty() {
            return Err(DaqError::Configuration("RadEye G20 port must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "RadEye G20 timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 9600 7-E-2 with the configured timeout.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(BAUD_RATE)
            .with_data_bits(DataBits::Seven)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two)
            .with_timeout(self.timeout())
    }
}

/// Factory for creating RadEye G20 driver instances.
pub struct RadEyeG20Factory;

static RADEYE_G20_CAPABILITIES: &[Capability] = &[Capability::Readable, Capability::DoseRateMeter];

impl DriverFactory for RadEyeG20Factory {
    fn driver_type(&self) -> &'static str {
        "radeye_g20"
    }

    fn name(&self) -> &'static str {
        "Thermo RadEye G20"
    }

    fn capabilities(&self) -> &'static [Capability] {
        RADEYE_G20_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: RadEyeG20Config = config.clone().try_into()?;
        cfg.validate()?;
        Ok(())
    }

    fn build(
        &self,
        config: toml::Value,
        time_offset: f64,
    ) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: RadEyeG20Config = config.try_into().context("Invalid RadEye G20 config")?;
            cfg.validate()?;

            let driver = Arc::new(RadEyeG20Driver::new_async(time_offset, &cfg).await);

            Ok(DeviceComponents::new()
                .with_readable(driver.clone())
                .with_dose_rate_meter(driver)
                .with_metadata(DeviceMetadata {
                    model: Some(MODEL.to_string()),
                    measurement_units: Some(DoseRateUnit::NanoSievertPerHour),
                }))
        })
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Convert one reading line to nSv/h.
///
/// The first two characters are a status prefix; the integer up to the first
/// space is the count. The prefix is counted in characters, not bytes.
pub fn parse_dose_line(line: &str) -> Result<f64, ReadError> {
    let start = line.char_indices().nth(2).map_or(line.len(), |(i, _)| i);
    let body = &line[start..];
    let token = body.split(' ').next().unwrap_or_default().trim();
    let count: i64 = token
        .parse()
        .map_err(|e| ReadError::malformed(line, format!("count {:?}: {}", token, e)))?;
    let nsv = count
        .checked_mul(NSV_PER_COUNT)
        .ok_or_else(|| ReadError::malformed(line, "count out of range"))?;
    Ok(nsv as f64)
}

// =============================================================================
// RadEyeG20Driver
// =============================================================================

/// Driver for the Thermo RadEye G20.
///
/// Implements [`Readable`] and [`DoseRateMeter`]; values are in nSv/h.
pub struct RadEyeG20Driver {
    port: Mutex<Option<BufferedPort>>,
    timeout: Duration,
    verification: String,
    clock: ElapsedClock,
    warnings: WarningLog,
}

impl RadEyeG20Driver {
    /// Open the configured port, run the handshake and identify the device.
    ///
    /// An unopenable port yields a degraded driver whose verification string
    /// is the error text.
    pub async fn new_async(time_offset: f64, config: &RadEyeG20Config) -> Self {
        match open_serial_async(&config.port, config.serial_settings(), MODEL).await {
            Ok(stream) => Self::with_port(time_offset, config, Box::new(stream)).await,
            Err(e) => {
                let text = format!("{:#}", e);
                tracing::warn!(port = %config.port, "RadEye G20 unavailable: {}", text);
                Self::degraded(time_offset, config, text)
            }
        }
    }

    /// Handshake and identify over an already-open stream.
    pub async fn with_port(time_offset: f64, config: &RadEyeG20Config, port: DynSerial) -> Self {
        let driver = Self::degraded(time_offset, config, String::new());
        let mut port = BufferedPort::new(port);

        if let Err(e) = setup(&mut port, driver.timeout).await {
            tracing::warn!(port = %config.port, "RadEye G20 handshake failed: {}", e);
            driver
                .warnings
                .push(format!("{}: handshake failed: {}", MODEL, e));
        }
        let verification = identify(&mut port, driver.timeout).await;
        tracing::info!(port = %config.port, "RadEye G20 identified: {}", verification);

        Self {
            port: Mutex::new(Some(port)),
            verification,
            ..driver
        }
    }

    /// A driver without a port; every read returns [`ReadError::NotConnected`].
    pub fn degraded(time_offset: f64, config: &RadEyeG20Config, verification: String) -> Self {
        Self {
            port: Mutex::new(None),
            timeout: config.timeout(),
            verification,
            clock: ElapsedClock::new(time_offset),
            warnings: WarningLog::new(),
        }
    }

    /// Repeat the `@` / `X1` handshake.
    pub async fn setup(&self) -> Result<(), ReadError> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(ReadError::NotConnected)?;
        setup(port, self.timeout).await
    }

    /// Clear pending input and classify the next line as
    /// `"connected"` / `"disconnected"`.
    pub async fn query_identification(&self) -> String {
        let mut guard = self.port.lock().await;
        match guard.as_mut() {
            Some(port) => identify(port, self.timeout).await,
            None => ReadError::NotConnected.to_string(),
        }
    }
}

async fn setup(port: &mut BufferedPort, timeout: Duration) -> Result<(), ReadError> {
    tracing::debug!("RadEye G20 sending handshake byte");
    port.write_bytes(HANDSHAKE_BYTE).await?;
    let ack = port.read_byte(timeout).await?;
    tracing::debug!("RadEye G20 handshake ack: {:#04x}", ack);

    tokio::time::sleep(HANDSHAKE_DELAY).await;

    tracing::debug!("RadEye G20 enabling auto-send");
    port.write_bytes(AUTO_SEND_COMMAND).await?;
    let reply = port.read_line(LineMode::Line, timeout).await?;
    tracing::debug!("RadEye G20 auto-send reply: {:?}", reply);
    Ok(())
}

async fn identify(port: &mut BufferedPort, timeout: Duration) -> String {
    let discarded = port.clear_input(CLEAR_WINDOW).await;
    if discarded > 0 {
        tracing::debug!("RadEye G20 cleared {} stale bytes", discarded);
    }
    match port.read_line(LineMode::Line, timeout).await {
        Ok(line) if line.contains(DEVICE_ID) => "connected".to_string(),
        Ok(_) => "disconnected".to_string(),
        Err(e) => {
            tracing::warn!("RadEye G20 warning in query_identification(): {}", e);
            e.to_string()
        }
    }
}

#[async_trait]
impl DoseRateMeter for RadEyeG20Driver {
    fn model(&self) -> &'static str {
        MODEL
    }

    fn unit(&self) -> DoseRateUnit {
        DoseRateUnit::NanoSievertPerHour
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

        let line = port.read_line(LineMode::Line, self.timeout).await?;
        tracing::debug!("RadEye G20 raw line: {:?}", line);
        parse_dose_line(&line)
    }

    async fn close(&self) {
        if self.port.lock().await.take().is_some() {
            tracing::info!("RadEye G20 port closed");
        }
    }
}

#[async_trait]
impl Readable for RadEyeG20Driver {
    async fn read(&self) -> Result<f64> {
        Ok(self.read_dose_rate().await?)
    }
}
