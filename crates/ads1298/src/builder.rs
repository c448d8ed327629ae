//! Builder pattern implementation for the ADS1298 driver.

use log::info;

use exg_types::DeviceConfig;

use crate::driver::Ads1298Driver;
use crate::hal::{GpioPort, SpiPort};
use crate::settings::{DriverSettings, StartupTiming, TransportKind};
use crate::simulation::{SampleClock, SimulatedGpio, SimulatedSpi};
use crate::types::DriverError;

/// Builder for creating an Ads1298Driver with a fluent interface.
///
/// Transports come either from the settings' [`TransportKind`] or from an
/// explicit pair of ports handed to [`Ads1298DriverBuilder::ports`].
#[derive(Default)]
pub struct Ads1298DriverBuilder {
    settings: DriverSettings,
    ports: Option<(Box<dyn SpiPort>, Box<dyn GpioPort>)>,
}

impl Ads1298DriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all settings.
    pub fn settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the device configuration.
    pub fn device_config(mut self, config: DeviceConfig) -> Self {
        self.settings.device = config;
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.settings.transport = transport;
        self
    }

    pub fn timing(mut self, timing: StartupTiming) -> Self {
        self.settings.timing = timing;
        self
    }

    /// Use these ports instead of the ones `transport` would select.
    pub fn ports(mut self, spi: Box<dyn SpiPort>, gpio: Box<dyn GpioPort>) -> Self {
        self.ports = Some((spi, gpio));
        self
    }

    /// Build a powered-down driver.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid, or if the hardware
    /// transport is selected in a build without the `pi-hardware` feature.
    pub fn build(self) -> Result<Ads1298Driver, DriverError> {
        let settings = self.settings;
        settings.validate()?;

        if let Some((spi, gpio)) = self.ports {
            return Ads1298Driver::new(settings, spi, gpio);
        }

        match settings.transport {
            TransportKind::Simulated => {
                info!("Using simulated ADS1298 transport");
                let clock = SampleClock::new(settings.device.sampling_rate);
                let spi = Box::new(SimulatedSpi::new(clock.clone()));
                let gpio = Box::new(SimulatedGpio::new(clock.clone()));
                Ads1298Driver::with_clock(settings, spi, gpio, clock)
            }
            TransportKind::Hardware => hardware_driver(settings),
        }
    }
}

#[cfg(feature = "pi-hardware")]
fn hardware_driver(settings: DriverSettings) -> Result<Ads1298Driver, DriverError> {
    use crate::rppal_hal::{RppalGpio, RppalSpi};

    let gpio = RppalGpio::new().map_err(|e| DriverError::GpioError(e.to_string()))?;
    Ads1298Driver::new(settings, Box::new(RppalSpi::new()), Box::new(gpio))
}

#[cfg(not(feature = "pi-hardware"))]
fn hardware_driver(_settings: DriverSettings) -> Result<Ads1298Driver, DriverError> {
    Err(DriverError::SettingsError(
        "hardware transport requires the `pi-hardware` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_hal::{MockGpio, MockSpi};
    use crate::types::{ConfigError, DeviceState};

    #[test]
    fn explicit_ports_take_precedence() {
        let spi = MockSpi::new();
        let mut driver = Ads1298DriverBuilder::new()
            .transport(TransportKind::Hardware)
            .timing(StartupTiming::immediate())
            .ports(Box::new(spi.clone()), Box::new(MockGpio::new()))
            .build()
            .unwrap();

        driver.open().unwrap();
        assert!(spi.is_open());
        assert_eq!(driver.state(), DeviceState::Idle);
    }

    #[test]
    fn invalid_device_config_is_rejected() {
        let config = DeviceConfig { channel_count: 0, ..Default::default() };
        let result = Ads1298DriverBuilder::new()
            .device_config(config)
            .transport(TransportKind::Simulated)
            .build();
        assert!(matches!(
            result,
            Err(DriverError::ConfigurationError(ConfigError::InvalidChannelCount(0)))
        ));
    }

    #[test]
    fn simulated_transport_builds_without_hardware() {
        let driver = Ads1298DriverBuilder::new()
            .transport(TransportKind::Simulated)
            .build()
            .unwrap();
        assert_eq!(driver.state(), DeviceState::PoweredDown);
        assert_eq!(driver.config().channel_count, 8);
    }
}
