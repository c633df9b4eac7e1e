//! `daq-core`
//!
//! Core trait definitions and types shared by the dose-rate meter drivers.
//!
//! ## Layers
//!
//! - **Line I/O** ([`line_io`]): timeout-bounded line and byte reads over any
//!   async byte stream, plus the stream aliases drivers own
//! - **Serial** (`serial`, feature `serial`): opening real ports with explicit
//!   framing
//! - **Capabilities** ([`capabilities`]): the traits drivers implement
//! - **Factories** ([`driver`]): config-driven construction
//!
//! ## Key Types
//!
//! - [`Reading`]: one timestamped poll result
//! - [`ReadError`]: why a read produced no value
//! - [`DaqError`]: configuration and device-management errors

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod line_io;
pub mod reading;
#[cfg(feature = "serial")]
pub mod serial;

pub use capabilities::{DoseRateMeter, Readable};
pub use error::{DaqError, ReadError};
pub use reading::{DoseRateUnit, ElapsedClock, Reading, WarningLog, DOSE_RATE_SENTINEL};
