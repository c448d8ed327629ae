//! Transport traits the driver is written against.
//!
//! The driver never touches hardware directly. It talks to an [`SpiPort`] for
//! register and frame traffic and to a [`GpioPort`] for the control lines and
//! the data-ready interrupt. Implementations live in `rppal_hal` (Raspberry
//! Pi), `mock_hal` (tests) and `simulation` (offline synthetic data).

use std::io;

use serde::{Deserialize, Serialize};

/// SPI clock polarity/phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiMode {
    /// CPOL = 0, CPHA = 0
    Mode0,
    /// CPOL = 0, CPHA = 1 (what the ADS1298 expects)
    Mode1,
    /// CPOL = 1, CPHA = 0
    Mode2,
    /// CPOL = 1, CPHA = 1
    Mode3,
}

/// Full-duplex SPI port
pub trait SpiPort: Send + 'static {
    /// Open `/dev/spidev<bus>.<device>` or equivalent
    fn open(&mut self, bus: u8, device: u8) -> Result<(), io::Error>;

    fn set_speed(&mut self, hz: u32) -> Result<(), io::Error>;

    fn set_mode(&mut self, mode: SpiMode) -> Result<(), io::Error>;

    /// Keep chip select asserted for `micros` after the last bit of every transfer
    fn set_cs_hold(&mut self, micros: u16) -> Result<(), io::Error>;

    /// Clock out `write` and return the bytes clocked in; same length as `write`
    fn transfer(&mut self, write: &[u8]) -> Result<Vec<u8>, io::Error>;

    fn close(&mut self) -> Result<(), io::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// Handler invoked on every falling edge of an input pin.
pub type EdgeHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// GPIO control lines and edge interrupts
pub trait GpioPort: Send + 'static {
    /// Claim a pin; outputs start at `initial`, inputs ignore it
    fn configure_pin(&mut self, pin: u8, direction: Direction, initial: Level) -> Result<(), io::Error>;

    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), io::Error>;

    /// Run `handler` on every falling edge of `pin`, on a context chosen by the implementation
    fn register_falling_edge(&mut self, pin: u8, handler: EdgeHandler) -> Result<(), io::Error>;

    /// Stop delivering edges of `pin`
    fn clear_falling_edge(&mut self, pin: u8) -> Result<(), io::Error>;

    /// Release every claimed pin
    fn cleanup(&mut self) -> Result<(), io::Error>;
}
