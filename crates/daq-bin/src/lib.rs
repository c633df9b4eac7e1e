//! `dose-logger` library
//!
//! The binary in `main.rs` is a thin clap front end over these modules:
//!
//! - [`config`]: Figment-based loading of the TOML device list
//! - [`registry`]: driver factories and the devices built from them
//! - [`logger`]: the polling loop and CSV rows

pub mod config;
pub mod logger;
pub mod registry;

pub use config::{DeviceConfig, LoggerConfig};
pub use logger::{poll_round, run_poll, PollOptions, Row};
pub use registry::{Device, DeviceRegistry};
