//! Serial Port Opening for Driver Crates
//!
//! # Feature Flag
//!
//! This module requires the `serial` feature to be enabled:
//!
//! ```toml
//! [dependencies]
//! daq-core = { path = "../daq-core", features = ["serial"] }
//! ```
//!
//! Unlike generic 8N1 helpers, both supported meters need non-default framing
//! (8-N-2 and 7-E-2), so line parameters travel in a [`SerialSettings`] value.
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::serial::{open_serial_async, DataBits, Parity, SerialSettings, StopBits};
//!
//! let settings = SerialSettings::new(9600)
//!     .with_data_bits(DataBits::Seven)
//!     .with_parity(Parity::Even)
//!     .with_stop_bits(StopBits::Two);
//! let port = open_serial_async("/dev/ttyUSB0", settings, "RadEye G20").await?;
//! ```

use anyhow::Context;
use std::fmt;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// Line parameters applied once when a port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate (e.g. 9600, 57600)
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Read timeout applied to every read on this port
    pub timeout: Duration,
}

impl SerialSettings {
    /// 8-N-1, no flow control, 1000 ms timeout at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Set the number of data bits.
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set the parity mode.
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the number of stop bits.
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for SerialSettings {
    /// Conventional `baud D-P-S` notation, e.g. `57600 8-N-2`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{} {}-{}-{}", self.baud_rate, data, parity, stop)
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Opening a tty can block on some platforms, so it runs off the async
/// runtime. Flow control is always off.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
/// The message names the device and the port path.
pub async fn open_serial_async(
    port_path: &str,
    settings: SerialSettings,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    tracing::debug!("opening {} on {} ({})", device_name, port_path, settings);

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_display() {
        let prm = SerialSettings::new(57600).with_stop_bits(StopBits::Two);
        assert_eq!(prm.to_string(), "57600 8-N-2");

        let g20 = SerialSettings::new(9600)
            .with_data_bits(DataBits::Seven)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two);
        assert_eq!(g20.to_string(), "9600 7-E-2");
    }

    #[test]
    fn test_settings_defaults() {
        let s = SerialSettings::new(9600).with_timeout(Duration::from_millis(250));
        assert_eq!(s.data_bits, DataBits::Eight);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_open_missing_port_names_device() {
        let err = open_serial_async(
            "/dev/this-port-does-not-exist",
            SerialSettings::new(9600),
            "Test Meter",
        )
        .await
        .unwrap_err();
        let text = format!("{:#}", err);
        assert!(text.contains("Test Meter"));
        assert!(text.contains("/dev/this-port-does-not-exist"));
    }
}
