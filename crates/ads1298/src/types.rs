//! Common types for the ADS1298 driver

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

use exg_types::{FrameError, SUPPORTED_SAMPLING_RATES};

/// Lifecycle state of the device.
///
/// `Idle`, `Configuring` and `Streaming` are the stream states; the other two
/// bracket them during power-up and after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    PoweredDown = 0,
    Resetting = 1,
    Idle = 2,
    Configuring = 3,
    Streaming = 4,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Resetting,
            2 => DeviceState::Idle,
            3 => DeviceState::Configuring,
            4 => DeviceState::Streaming,
            _ => DeviceState::PoweredDown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::PoweredDown => "powered down",
            DeviceState::Resetting => "resetting",
            DeviceState::Idle => "idle",
            DeviceState::Configuring => "configuring",
            DeviceState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// The device state shared between the control calls and the ready-signal
/// handler.
///
/// Only the control context writes it; the handler reads it without
/// blocking.
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new(state: DeviceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: DeviceState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn is_streaming(&self) -> bool {
        self.get() == DeviceState::Streaming
    }
}

/// Rejected configuration requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported sampling rate: {0} Hz. Supported rates: {:?}", SUPPORTED_SAMPLING_RATES)]
    UnsupportedSamplingRate(u32),
    #[error("invalid channel count: {0}. ADS1298 supports 1-8 channels")]
    InvalidChannelCount(u8),
    #[error("operation not allowed while the device is {0}")]
    InvalidState(DeviceState),
    #[error("multi-register write needs at least one value")]
    EmptyRegisterWrite,
}

/// Errors that can occur in the driver
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Invalid configuration or a call made in the wrong state
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),
    /// The ID register does not describe an ADS1298
    #[error("Identification error: ID register 0x{id:02X}, {reason}")]
    IdentificationError { id: u8, reason: &'static str },
    /// A frame could not be decoded
    #[error("Frame error: {0}")]
    FrameError(#[from] FrameError),
    /// SPI transport error
    #[error("SPI error: {0}")]
    SpiError(String),
    /// GPIO error
    #[error("GPIO error: {0}")]
    GpioError(String),
    /// Settings could not be loaded or are unusable
    #[error("Settings error: {0}")]
    SettingsError(String),
    /// Driver not opened
    #[error("Driver not initialized")]
    NotInitialized,
}

impl DriverError {
    /// True for errors raised by the bus or GPIO transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::SpiError(_) | DriverError::GpioError(_))
    }
}
