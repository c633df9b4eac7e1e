//! Device registry: driver factories in, built devices out.
//!
//! Factories are registered by `driver_type`. Devices are built from
//! [`DeviceConfig`] entries after the whole list has been validated, so a
//! typo in the last entry fails before any port is opened.

use crate::config::DeviceConfig;
use daq_core::capabilities::DoseRateMeter;
use daq_core::driver::{Capability, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_driver_dosimetry::{Prm9000Factory, RadEyeG20Factory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A built device.
pub struct Device {
    /// Configured id
    pub id: String,
    /// Driver name from the factory
    pub driver_name: &'static str,
    /// Dose-rate capability
    pub meter: Arc<dyn DoseRateMeter>,
    /// Model and units reported by the factory
    pub metadata: DeviceMetadata,
}

/// Registry of driver factories and the devices built from them.
#[derive(Default)]
pub struct DeviceRegistry {
    factories: HashMap<String, Box<dyn DriverFactory>>,
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Empty registry with no factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the PRM-9000 and RadEye G20 factories registered.
    pub fn with_default_factories() -> Self {
        daq_driver_dosimetry::link();
        let mut registry = Self::new();
        registry.register_factory(Box::new(Prm9000Factory));
        registry.register_factory(Box::new(RadEyeG20Factory));
        registry
    }

    /// Register a driver factory, returning the one it replaces, if any.
    pub fn register_factory(
        &mut self,
        factory: Box<dyn DriverFactory>,
    ) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::debug!(
            driver_type = %driver_type,
            name = %factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Registered driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Check every entry: known type, unique id, settings accepted by the factory.
    pub fn validate_all(&self, devices: &[DeviceConfig]) -> Result<(), DaqError> {
        let mut seen: HashSet<&str> = self.devices.iter().map(|d| d.id.as_str()).collect();
        for device in devices {
            if !seen.insert(device.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Device '{}' is already registered",
                    device.id
                )));
            }
            let factory = self.factory_for(&device.driver_type)?;
            factory.validate(&device.driver_config()).map_err(|e| {
                DaqError::Configuration(format!("device '{}': {:#}", device.id, e))
            })?;
        }
        Ok(())
    }

    /// Build one device and add it to the registry.
    pub async fn register_from_config(
        &mut self,
        device: &DeviceConfig,
        time_offset: f64,
    ) -> Result<(), DaqError> {
        self.validate_all(std::slice::from_ref(device))?;
        let factory = self.factory_for(&device.driver_type)?;
        let driver_name = factory.name();

        let components = factory
            .build(device.driver_config(), time_offset)
            .await
            .map_err(|e| DaqError::Configuration(format!("device '{}': {:#}", device.id, e)))?;

        let meter = components.dose_rate_meter.ok_or_else(|| {
            DaqError::Configuration(format!(
                "driver '{}' does not provide the {} capability",
                device.driver_type,
                Capability::DoseRateMeter.name()
            ))
        })?;

        tracing::info!(
            device = %device.id,
            driver = driver_name,
            verification = meter.verification_string(),
            "Device ready"
        );

        self.devices.push(Device {
            id: device.id.clone(),
            driver_name,
            meter,
            metadata: components.metadata,
        });
        Ok(())
    }

    /// Validate the whole list, then build every device in order.
    pub async fn build_all(
        &mut self,
        devices: &[DeviceConfig],
        time_offset: f64,
    ) -> Result<(), DaqError> {
        self.validate_all(devices)?;
        for device in devices {
            self.register_from_config(device, time_offset).await?;
        }
        Ok(())
    }

    /// Built devices in registration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Close every device's port.
    pub async fn close_all(&self) {
        futures::future::join_all(self.devices.iter().map(|d| d.meter.close())).await;
        tracing::info!("Closed {} device(s)", self.devices.len());
    }

    fn factory_for(&self, driver_type: &str) -> Result<&dyn DriverFactory, DaqError> {
        self.factories
            .get(driver_type)
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                tracing::warn!(
                    driver_type,
                    available = ?self.list_factories(),
                    "No factory registered"
                );
                DaqError::UnknownDriver(driver_type.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, driver_type: &str, port: &str) -> DeviceConfig {
        let mut settings = toml::Table::new();
        settings.insert("port".into(), toml::Value::String(port.into()));
        DeviceConfig {
            id: id.into(),
            driver_type: driver_type.into(),
            settings,
        }
    }

    #[test]
    fn test_default_factories() {
        let registry = DeviceRegistry::with_default_factories();
        assert_eq!(registry.list_factories(), vec!["prm9000", "radeye_g20"]);
    }

    #[test]
    fn test_register_factory_replaces() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.register_factory(Box::new(Prm9000Factory)).is_none());
        assert!(registry.register_factory(Box::new(Prm9000Factory)).is_some());
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let registry = DeviceRegistry::with_default_factories();
        let err = registry
            .validate_all(&[device("a", "geiger", "/dev/ttyUSB0")])
            .unwrap_err();
        assert!(matches!(err, DaqError::UnknownDriver(ref t) if t == "geiger"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = DeviceRegistry::with_default_factories();
        let err = registry
            .validate_all(&[
                device("a", "prm9000", "/dev/ttyUSB0"),
                device("a", "radeye_g20", "/dev/ttyUSB1"),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_factory_validation_error_names_device() {
        let registry = DeviceRegistry::with_default_factories();
        let mut bad = device("prm", "prm9000", "/dev/ttyUSB0");
        bad.settings
            .insert("max_attempts".into(), toml::Value::Integer(0));
        let err = registry.validate_all(&[bad]).unwrap_err();
        assert!(err.to_string().contains("device 'prm'"));
        assert!(err.to_string().contains("max_attempts"));
    }

    #[tokio::test]
    async fn test_build_all_validates_before_opening() {
        let mut registry = DeviceRegistry::with_default_factories();
        let result = registry
            .build_all(
                &[
                    device("ok", "prm9000", "/dev/dose-logger-missing-0"),
                    device("bad", "nope", "/dev/dose-logger-missing-1"),
                ],
                0.0,
            )
            .await;
        assert!(result.is_err());
        assert!(registry.devices().is_empty());
    }

    #[tokio::test]
    async fn test_build_all_keeps_degraded_devices() {
        let mut registry = DeviceRegistry::with_default_factories();
        registry
            .build_all(
                &[
                    device("prm", "prm9000", "/dev/dose-logger-missing-0"),
                    device("g20", "radeye_g20", "/dev/dose-logger-missing-1"),
                ],
                0.0,
            )
            .await
            .unwrap();

        let devices = registry.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "prm");
        assert_eq!(devices[0].driver_name, "PRM-9000 Geiger Counter");
        assert_eq!(devices[1].metadata.model.as_deref(), Some("RadEye G20"));
        assert!(devices[0]
            .meter
            .verification_string()
            .contains("/dev/dose-logger-missing-0"));

        // Ids stay reserved after building.
        assert!(registry
            .validate_all(&[device("prm", "prm9000", "/dev/x")])
            .is_err());

        registry.close_all().await;
    }
}
