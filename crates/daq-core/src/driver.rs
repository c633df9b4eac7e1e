//! Driver Factory and Component Types
//!
//! Drivers implement [`DriverFactory`] and are registered with a device
//! registry at startup via explicit `registry.register_factory(factory)` calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Composition Root (main.rs)                    │
//! │  registry.register_factory(Prm9000Factory);                     │
//! │  registry.register_factory(RadEyeG20Factory);                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        DeviceRegistry                           │
//! │  factories: HashMap<driver_type, Box<dyn DriverFactory>>        │
//! │  devices: Vec<(device_id, DeviceComponents)>                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DriverFactory::build()                       │
//! │  Parses TOML config, opens the port, returns capabilities       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::capabilities::{DoseRateMeter, Readable};
use crate::reading::DoseRateUnit;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can read scalar values
    /// Corresponds to [`crate::capabilities::Readable`]
    Readable,

    /// Produces timestamped dose-rate readings
    /// Corresponds to [`crate::capabilities::DoseRateMeter`]
    DoseRateMeter,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Readable => "Readable",
            Self::DoseRateMeter => "Dose-Rate Meter",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// ```rust,ignore
/// let driver = Arc::new(MyMeter::new_async(...).await);
///
/// let components = DeviceComponents::new()
///     .with_readable(driver.clone())
///     .with_dose_rate_meter(driver);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Readable implementation (scalar measurements)
    pub readable: Option<Arc<dyn Readable>>,

    /// DoseRateMeter implementation (timestamped readings, warnings)
    pub dose_rate_meter: Option<Arc<dyn DoseRateMeter>>,

    /// Capability-specific metadata (units, model)
    pub metadata: DeviceMetadata,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.readable.is_some() {
            caps.push(Capability::Readable);
        }
        if self.dose_rate_meter.is_some() {
            caps.push(Capability::DoseRateMeter);
        }

        caps
    }

    /// Set Readable implementation
    pub fn with_readable(mut self, r: Arc<dyn Readable>) -> Self {
        self.readable = Some(r);
        self
    }

    /// Set DoseRateMeter implementation
    pub fn with_dose_rate_meter(mut self, m: Arc<dyn DoseRateMeter>) -> Self {
        self.dose_rate_meter = Some(m);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Metadata that isn't captured in the trait objects themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMetadata {
    /// Instrument model (e.g. "RadEye G20")
    pub model: Option<String>,

    /// For Readable devices: measurement units
    pub measurement_units: Option<DoseRateUnit>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// # Lifetime
///
/// Factories are registered once at startup and live for the program's lifetime.
/// They must be `Send + Sync + 'static` because they may be called from any task.
///
/// # Error Handling
///
/// `validate()` rejects bad configuration before any port is touched. `build()`
/// fails only on configuration errors: a port that cannot be opened still
/// yields a (degraded) device whose verification string carries the error.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// # Arguments
    ///
    /// * `config` - TOML value containing driver configuration
    /// * `time_offset` - Seconds since the Unix epoch subtracted from reading timestamps
    fn build(
        &self,
        config: toml::Value,
        time_offset: f64,
    ) -> BoxFuture<'static, Result<DeviceComponents>>;
}
