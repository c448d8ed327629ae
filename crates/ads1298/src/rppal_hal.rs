//! Raspberry Pi transports built on `rppal`.

use std::collections::HashMap;
use std::io;

use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, Segment, SlaveSelect, Spi};

use crate::hal::{Direction, EdgeHandler, GpioPort, Level, SpiMode, SpiPort};

fn other<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "SPI port not open")
}

/// SPI implementation using rppal
pub struct RppalSpi {
    spi: Option<Spi>,
    cs_hold_us: u16,
}

impl RppalSpi {
    pub fn new() -> Self {
        Self { spi: None, cs_hold_us: 0 }
    }

    fn spi(&self) -> Result<&Spi, io::Error> {
        self.spi.as_ref().ok_or_else(not_open)
    }
}

impl Default for RppalSpi {
    fn default() -> Self {
        Self::new()
    }
}

fn to_bus(bus: u8) -> Result<Bus, io::Error> {
    Ok(match bus {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        2 => Bus::Spi2,
        3 => Bus::Spi3,
        4 => Bus::Spi4,
        5 => Bus::Spi5,
        6 => Bus::Spi6,
        _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid SPI bus {}", bus))),
    })
}

fn to_slave_select(device: u8) -> Result<SlaveSelect, io::Error> {
    Ok(match device {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid SPI device {}", device))),
    })
}

fn to_mode(mode: SpiMode) -> Mode {
    match mode {
        SpiMode::Mode0 => Mode::Mode0,
        SpiMode::Mode1 => Mode::Mode1,
        SpiMode::Mode2 => Mode::Mode2,
        SpiMode::Mode3 => Mode::Mode3,
    }
}

impl SpiPort for RppalSpi {
    fn open(&mut self, bus: u8, device: u8) -> Result<(), io::Error> {
        // Speed and mode are applied right after by the bus
        let spi = Spi::new(to_bus(bus)?, to_slave_select(device)?, 5_000_000, Mode::Mode1).map_err(other)?;
        self.spi = Some(spi);
        debug!("rppal SPI bus {} device {} opened", bus, device);
        Ok(())
    }

    fn set_speed(&mut self, hz: u32) -> Result<(), io::Error> {
        self.spi()?.set_clock_speed(hz).map_err(other)
    }

    fn set_mode(&mut self, mode: SpiMode) -> Result<(), io::Error> {
        self.spi()?.set_mode(to_mode(mode)).map_err(other)
    }

    fn set_cs_hold(&mut self, micros: u16) -> Result<(), io::Error> {
        self.cs_hold_us = micros;
        Ok(())
    }

    fn transfer(&mut self, write: &[u8]) -> Result<Vec<u8>, io::Error> {
        let mut read = vec![0u8; write.len()];
        let mut segment = Segment::new(&mut read, write);
        segment.set_delay(self.cs_hold_us);
        self.spi()?.transfer_segments(&[segment]).map_err(other)?;
        Ok(read)
    }

    fn close(&mut self) -> Result<(), io::Error> {
        self.spi = None;
        Ok(())
    }
}

/// GPIO implementation using rppal
///
/// Falling-edge handlers run on rppal's interrupt thread.
pub struct RppalGpio {
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
    inputs: HashMap<u8, InputPin>,
}

impl RppalGpio {
    pub fn new() -> Result<Self, io::Error> {
        let gpio = Gpio::new().map_err(other)?;
        info!("GPIO initialized.");
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
            inputs: HashMap::new(),
        })
    }
}

impl GpioPort for RppalGpio {
    fn configure_pin(&mut self, pin: u8, direction: Direction, initial: Level) -> Result<(), io::Error> {
        let gpio_pin = self.gpio.get(pin).map_err(other)?;
        match direction {
            Direction::Output => {
                let output = match initial {
                    Level::Low => gpio_pin.into_output_low(),
                    Level::High => gpio_pin.into_output_high(),
                };
                self.outputs.insert(pin, output);
            }
            Direction::Input => {
                self.inputs.insert(pin, gpio_pin.into_input());
            }
        }
        Ok(())
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), io::Error> {
        let output = self.outputs.get_mut(&pin).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("pin {} is not configured as output", pin))
        })?;
        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }

    fn register_falling_edge(&mut self, pin: u8, handler: EdgeHandler) -> Result<(), io::Error> {
        let input = self.inputs.get_mut(&pin).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("pin {} is not configured as input", pin))
        })?;
        input
            .set_async_interrupt(Trigger::FallingEdge, None, move |_| handler())
            .map_err(other)?;
        info!("Asynchronous falling-edge handler registered on pin {}", pin);
        Ok(())
    }

    fn clear_falling_edge(&mut self, pin: u8) -> Result<(), io::Error> {
        if let Some(input) = self.inputs.get_mut(&pin) {
            input.clear_async_interrupt().map_err(other)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), io::Error> {
        for input in self.inputs.values_mut() {
            input.clear_async_interrupt().map_err(other)?;
        }
        // Dropping the pins restores their previous mode
        self.inputs.clear();
        self.outputs.clear();
        Ok(())
    }
}
