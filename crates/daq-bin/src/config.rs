//! Logger configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file given on the command line (base configuration)
//! 2. Environment variables prefixed with `DOSE_LOGGER_` (top-level keys only)
//!
//! # Example
//!
//! ```toml
//! poll_interval_ms = 1000
//!
//! [[devices]]
//! id = "prm"
//! type = "prm9000"
//! port = "/dev/ttyUSB0"
//! cpm_to_usv = 0.002857
//!
//! [[devices]]
//! id = "g20"
//! type = "radeye_g20"
//! port = "/dev/ttyUSB1"
//! ```
//!
//! Everything in a `[[devices]]` entry other than `id` and `type` is handed
//! to the driver factory unchanged.

use anyhow::{bail, Context, Result};
use daq_core::error::DaqError;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides, e.g. `DOSE_LOGGER_POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "DOSE_LOGGER_";

/// Top-level logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Delay between polling rounds in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Devices to build, in polling order
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier, used as the CSV `device` column
    pub id: String,
    /// Driver type (e.g. "prm9000", "radeye_g20")
    #[serde(rename = "type")]
    pub driver_type: String,
    /// Driver-specific settings
    #[serde(flatten)]
    pub settings: toml::Table,
}

impl DeviceConfig {
    /// Driver settings as the value passed to `DriverFactory::build`.
    pub fn driver_config(&self) -> toml::Value {
        toml::Value::Table(self.settings.clone())
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl LoggerConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Unlike a bare `Toml::file` provider, a missing file is an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration after loading.
    ///
    /// Driver-specific settings are checked later by each factory.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.devices.is_empty() {
            return Err(DaqError::Configuration("no [[devices]] configured".into()));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(DaqError::Configuration("device id must not be empty".into()));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "duplicate device id '{}'",
                    device.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_DEVICES: &str = r#"
poll_interval_ms = 500

[[devices]]
id = "prm"
type = "prm9000"
port = "/dev/ttyUSB0"
cpm_to_usv = 0.0065
line_mode = "bytewise"

[[devices]]
id = "g20"
type = "radeye_g20"
port = "/dev/ttyUSB1"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_devices_in_order() {
        let file = write_config(TWO_DEVICES);
        let config = LoggerConfig::load_from(file.path()).unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].id, "prm");
        assert_eq!(config.devices[0].driver_type, "prm9000");
        assert_eq!(config.devices[1].driver_type, "radeye_g20");
    }

    #[test]
    fn test_driver_settings_exclude_id_and_type() {
        let file = write_config(TWO_DEVICES);
        let config = LoggerConfig::load_from(file.path()).unwrap();

        let settings = config.devices[0].driver_config();
        let table = settings.as_table().unwrap();
        assert!(!table.contains_key("id"));
        assert!(!table.contains_key("type"));
        assert_eq!(table["port"].as_str(), Some("/dev/ttyUSB0"));
        assert_eq!(table["cpm_to_usv"].as_float(), Some(0.0065));
        assert_eq!(table["line_mode"].as_str(), Some("bytewise"));
    }

    #[test]
    fn test_default_poll_interval() {
        let file = write_config(
            r#"
[[devices]]
id = "only"
type = "prm9000"
port = "COM3"
"#,
        );
        let config = LoggerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let file = write_config(
            r#"
[[devices]]
id = "same"
type = "prm9000"
port = "/dev/ttyUSB0"

[[devices]]
id = "same"
type = "radeye_g20"
port = "/dev/ttyUSB1"
"#,
        );
        let err = LoggerConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate device id 'same'"));
    }

    #[test]
    fn test_empty_device_list_rejected() {
        let file = write_config("poll_interval_ms = 100\n");
        assert!(LoggerConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoggerConfig::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("dose.toml", TWO_DEVICES)?;
            jail.set_env("DOSE_LOGGER_POLL_INTERVAL_MS", "250");

            let config = LoggerConfig::load_from("dose.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.poll_interval_ms, 250);
            assert_eq!(config.devices.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_zero_interval_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("dose.toml", TWO_DEVICES)?;
            jail.set_env("DOSE_LOGGER_POLL_INTERVAL_MS", "0");

            assert!(LoggerConfig::load_from("dose.toml").is_err());
            Ok(())
        });
    }
}
