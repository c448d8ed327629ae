//! Board wiring, transport selection and startup timing.

use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use exg_types::{DeviceConfig, MAX_CHANNELS};

use crate::hal::SpiMode;
use crate::registers::sampling_rate_to_config1;
use crate::types::{ConfigError, DriverError};

/// Which transports the builder wires the driver to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raspberry Pi SPI and GPIO through rppal
    #[default]
    Hardware,
    /// Synthetic frames, no hardware access
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiSettings {
    pub bus: u8,
    /// Chip select line on the bus
    pub device: u8,
    pub speed_hz: u32,
    pub mode: SpiMode,
    /// Chip select held after each transfer, in microseconds
    pub cs_hold_us: u16,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            bus: 0,
            device: 1,
            speed_hz: 5_000_000,
            mode: SpiMode::Mode1,
            cs_hold_us: 3,
        }
    }
}

/// BCM pin numbers of the control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    pub start: u8,
    /// nRESET, active low
    pub reset: u8,
    /// nPWRDN, active low
    pub power_down: u8,
    /// nDRDY, falling edge when a frame is ready
    pub drdy: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            start: 22,
            reset: 24,
            power_down: 25,
            drdy: 23,
        }
    }
}

impl PinMap {
    fn all(&self) -> [u8; 4] {
        [self.start, self.reset, self.power_down, self.drdy]
    }
}

/// Delays of the power-up and reset sequences, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupTiming {
    pub power_settle_ms: u64,
    pub reset_pulse_ms: u64,
    pub reset_recovery_ms: u64,
}

impl Default for StartupTiming {
    fn default() -> Self {
        Self {
            power_settle_ms: 1000,
            reset_pulse_ms: 200,
            reset_recovery_ms: 200,
        }
    }
}

impl StartupTiming {
    /// No delays at all; for mocks that don't need the chip to settle.
    pub fn immediate() -> Self {
        Self {
            power_settle_ms: 0,
            reset_pulse_ms: 0,
            reset_recovery_ms: 0,
        }
    }

    pub fn power_settle(&self) -> Duration {
        Duration::from_millis(self.power_settle_ms)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_millis(self.reset_pulse_ms)
    }

    pub fn reset_recovery(&self) -> Duration {
        Duration::from_millis(self.reset_recovery_ms)
    }
}

/// Everything needed to bring up one ADS1298.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub device: DeviceConfig,
    pub transport: TransportKind,
    pub spi: SpiSettings,
    pub pins: PinMap,
    pub timing: StartupTiming,
}

impl DriverSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DriverError::SettingsError(format!("could not read '{}': {}", path.display(), e))
        })?;
        let settings: DriverSettings = serde_json::from_str(&contents).map_err(|e| {
            DriverError::SettingsError(format!("could not parse '{}': {}", path.display(), e))
        })?;
        settings.validate()?;
        info!("Loaded driver settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        let channels = self.device.channel_count;
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount(channels).into());
        }
        sampling_rate_to_config1(self.device.sampling_rate)?;

        if self.spi.speed_hz == 0 {
            return Err(DriverError::SettingsError("SPI speed must be greater than 0".to_string()));
        }

        let pins = self.pins.all();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                return Err(DriverError::SettingsError(format!(
                    "GPIO pin {} is assigned to more than one signal",
                    pin
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
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_describe_the_reference_board() {
        let settings = DriverSettings::default();
        assert_eq!(settings.transport, TransportKind::Hardware);
        assert_eq!(
            settings.spi,
            SpiSettings { bus: 0, device: 1, speed_hz: 5_000_000, mode: SpiMode::Mode1, cs_hold_us: 3 }
        );
        assert_eq!(settings.pins.all(), [22, 24, 25, 23]);
        assert_eq!(settings.timing.power_settle(), Duration::from_secs(1));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"transport": "simulated", "device": {{"sampling_rate": 2000, "bias_enabled": true}}, "pins": {{"drdy": 17}}, "spi": {{"cs_hold_us": 5}}}}"#
        )
        .unwrap();

        let settings = DriverSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.transport, TransportKind::Simulated);
        assert_eq!(settings.device.sampling_rate, 2000);
        assert_eq!(settings.device.channel_count, 8);
        assert!(settings.device.bias_enabled);
        assert_eq!(settings.pins.drdy, 17);
        assert_eq!(settings.pins.start, 22);
        assert_eq!(settings.spi.speed_hz, 5_000_000);
        assert_eq!(settings.spi.cs_hold_us, 5);
    }

    #[test]
    fn unsupported_rate_in_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"device": {{"sampling_rate": 250}}}}"#).unwrap();

        let err = DriverSettings::from_json_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ConfigurationError(ConfigError::UnsupportedSamplingRate(250))
        ));
    }

    #[test]
    fn missing_or_malformed_file_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            DriverSettings::from_json_file(&missing),
            Err(DriverError::SettingsError(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            DriverSettings::from_json_file(file.path()),
            Err(DriverError::SettingsError(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_wiring() {
        let mut settings = DriverSettings::default();
        settings.device.channel_count = 9;
        assert!(matches!(
            settings.validate(),
            Err(DriverError::ConfigurationError(ConfigError::InvalidChannelCount(9)))
        ));

        let mut settings = DriverSettings::default();
        settings.pins.drdy = settings.pins.start;
        assert!(matches!(settings.validate(), Err(DriverError::SettingsError(_))));
    }
}
