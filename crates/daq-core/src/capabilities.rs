//! Hardware Capabilities
//!
//! Devices implement small capability traits instead of one monolithic
//! instrument trait:
//!
//! - [`Readable`]: a single scalar readout, usable by generic readers
//! - [`DoseRateMeter`]: the full dose-rate surface (timestamped readings,
//!   verification string, warning drain, explicit close)
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; drivers keep their port behind a mutex
//!
//! # Example
//!
//! ```rust,ignore
//! async fn log_once(meter: &dyn DoseRateMeter) {
//!     let reading = meter.read_value().await;
//!     println!("{:?} {}", reading.as_array(), meter.unit());
//!     for w in meter.take_warnings() {
//!         eprintln!("warning: {}", w);
//!     }
//! }
//! ```

use crate::error::ReadError;
use crate::reading::{DoseRateUnit, ElapsedClock, Reading, WarningLog};
use anyhow::Result;
use async_trait::async_trait;

/// Capability: Scalar Readout
///
/// Devices that produce single scalar values (dose-rate meters, power meters,
/// temperature sensors).
///
/// # Contract
/// - `read()` performs measurement and returns value
/// - Units are device-specific (document in implementation)
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    ///
    /// # Returns
    /// - Ok(value) on successful read
    /// - Err on hardware error or timeout
    async fn read(&self) -> Result<f64>;
}

/// Capability: Dose-Rate Metering
///
/// # Contract
/// - The verification string is fixed once construction returns
/// - [`read_value`](Self::read_value) never fails; a failed read becomes a
///   missing dose rate plus an entry in the warning log
/// - After [`close`](Self::close), or when the port never opened, every read
///   returns [`ReadError::NotConnected`]
#[async_trait]
pub trait DoseRateMeter: Send + Sync {
    /// Human-readable instrument model (e.g. "PRM-9000").
    fn model(&self) -> &'static str;

    /// Unit of the values returned by [`read_dose_rate`](Self::read_dose_rate).
    fn unit(&self) -> DoseRateUnit;

    /// Result of the identification exchange performed at construction, or
    /// the error text when the port could not be opened.
    fn verification_string(&self) -> &str;

    /// Clock used to timestamp readings.
    fn clock(&self) -> &ElapsedClock;

    /// Warning log drained by [`take_warnings`](Self::take_warnings).
    fn warning_log(&self) -> &WarningLog;

    /// Whether the driver currently owns an open port.
    async fn is_connected(&self) -> bool;

    /// Read one dose rate from the device.
    async fn read_dose_rate(&self) -> std::result::Result<f64, ReadError>;

    /// Release the port. Idempotent.
    async fn close(&self);

    /// Timestamped reading; see the trait contract for failure handling.
    async fn read_value(&self) -> Reading {
        let elapsed_s = self.clock().elapsed();
        let dose_rate = match self.read_dose_rate().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(model = self.model(), error = %e, "dose-rate read failed");
                self.warning_log()
                    .push(format!("{}: dose-rate read failed: {}", self.model(), e));
                None
            }
        };
        Reading {
            elapsed_s,
            dose_rate,
            unit: self.unit(),
        }
    }

    /// Return accumulated warnings and clear them.
    fn take_warnings(&self) -> Vec<String> {
        self.warning_log().drain()
    }
}
