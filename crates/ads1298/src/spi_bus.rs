//! A thread-safe SPI bus shared by the control calls and the data-ready handler.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};

use crate::hal::SpiPort;
use crate::registers::{self, register_name};
use crate::settings::SpiSettings;
use crate::types::DriverError;

/// Last value written to each register, kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterImage(BTreeMap<u8, u8>);

impl RegisterImage {
    pub fn get(&self, addr: u8) -> Option<u8> {
        self.0.get(&addr).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.0.iter().map(|(&addr, &value)| (addr, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set(&mut self, addr: u8, value: u8) {
        self.0.insert(addr, value);
    }
}

/// Wraps the SPI port in a mutex so that each transaction owns the bus for
/// exactly its own duration.
///
/// No transaction is atomic with respect to another one: two register writes
/// from different contexts may interleave between transactions.
pub struct SpiBus {
    port: Mutex<Box<dyn SpiPort>>,
    image: Mutex<RegisterImage>,
}

impl SpiBus {
    pub fn new(port: Box<dyn SpiPort>) -> Self {
        Self {
            port: Mutex::new(port),
            image: Mutex::new(RegisterImage::default()),
        }
    }

    fn lock_port(&self) -> Result<MutexGuard<'_, Box<dyn SpiPort>>, DriverError> {
        self.port
            .lock()
            .map_err(|_| DriverError::SpiError("SPI bus lock poisoned".to_string()))
    }

    fn lock_image(&self) -> MutexGuard<'_, RegisterImage> {
        // The image is plain data; a panic while holding it cannot leave it half-written.
        self.image.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the underlying port and apply clock speed, mode and chip-select hold.
    pub fn open(&self, settings: &SpiSettings) -> Result<(), DriverError> {
        let mut port = self.lock_port()?;
        port.open(settings.bus, settings.device).map_err(spi_error("open"))?;
        port.set_speed(settings.speed_hz).map_err(spi_error("set speed"))?;
        port.set_mode(settings.mode).map_err(spi_error("set mode"))?;
        port.set_cs_hold(settings.cs_hold_us).map_err(spi_error("set CS hold"))?;
        debug!(
            "SPI {}.{} opened at {} Hz, {:?}, CS hold {} us",
            settings.bus, settings.device, settings.speed_hz, settings.mode, settings.cs_hold_us
        );
        Ok(())
    }

    pub fn close(&self) -> Result<(), DriverError> {
        self.lock_port()?.close().map_err(spi_error("close"))
    }

    /// One full-duplex transaction under the bus lock.
    pub fn transfer(&self, write: &[u8]) -> Result<Vec<u8>, DriverError> {
        let mut port = self.lock_port()?;
        let read = port.transfer(write).map_err(spi_error("transfer"))?;
        if read.len() != write.len() {
            return Err(DriverError::SpiError(format!(
                "short transfer: wrote {} bytes, read {}",
                write.len(),
                read.len()
            )));
        }
        Ok(read)
    }

    /// Transmit a single command opcode.
    pub fn send_command(&self, command: u8) -> Result<(), DriverError> {
        debug!("SPI command 0x{:02X}", command);
        self.transfer(&[command]).map(|_| ())
    }

    /// Write one register. The image is updated even if the transfer fails.
    pub fn write_single(&self, register: u8, value: u8) -> Result<(), DriverError> {
        self.lock_image().set(register, value);
        debug!("WREG {:<10} (0x{:02X}) <- 0x{:02X}", register_name(register), register, value);
        self.transfer(&registers::encode_write_single(register, value)).map(|_| ())
    }

    /// Write `values` to contiguous registers starting at `base`.
    pub fn write_multiple(&self, base: u8, values: &[u8]) -> Result<(), DriverError> {
        let buffer = registers::encode_write_multiple(base, values)?;
        {
            let mut image = self.lock_image();
            for (offset, &value) in values.iter().enumerate() {
                image.set(base.wrapping_add(offset as u8), value);
            }
        }
        debug!("WREG {} registers from 0x{:02X}: {:02X?}", values.len(), base, values);
        self.transfer(&buffer).map(|_| ())
    }

    /// Read one register.
    pub fn read_single(&self, register: u8) -> Result<u8, DriverError> {
        let response = self.transfer(&registers::encode_read_single(register))?;
        let value = response[2];
        debug!("RREG {:<10} (0x{:02X}) -> 0x{:02X}", register_name(register), register, value);
        Ok(value)
    }

    /// Clock out `len` bytes of a continuous-read frame.
    pub fn read_frame(&self, len: usize) -> Result<Vec<u8>, DriverError> {
        let frame = self.transfer(&vec![0u8; len])?;
        trace!("Frame bytes: {:02X?}", frame);
        Ok(frame)
    }

    pub fn register_image(&self) -> RegisterImage {
        self.lock_image().clone()
    }
}

fn spi_error(context: &'static str) -> impl Fn(std::io::Error) -> DriverError {
    move |e| DriverError::SpiError(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_hal::MockSpi;
    use crate::hal::SpiMode;
    use crate::registers::{CH1SET_ADDR, CMD_SDATAC, CONFIG3_ADDR, REG_ID_ADDR};

    #[test]
    fn writes_update_image_and_wire() {
        let spi = MockSpi::new();
        let bus = SpiBus::new(Box::new(spi.clone()));

        bus.write_single(CONFIG3_ADDR, 0x48).unwrap();
        bus.write_multiple(CH1SET_ADDR, &[0x60, 0x61, 0x62]).unwrap();

        assert_eq!(
            spi.transactions(),
            vec![vec![0x43, 0x00, 0x48], vec![0x45, 0x02, 0x60, 0x61, 0x62]]
        );
        let image = bus.register_image();
        assert_eq!(image.get(CONFIG3_ADDR), Some(0x48));
        assert_eq!(image.get(CH1SET_ADDR + 2), Some(0x62));
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn image_updates_even_when_the_write_fails() {
        let spi = MockSpi::new();
        spi.fail_transfers(true);
        let bus = SpiBus::new(Box::new(spi.clone()));

        let result = bus.write_single(CONFIG3_ADDR, 0xEC);
        assert!(matches!(result, Err(DriverError::SpiError(_))));
        assert_eq!(bus.register_image().get(CONFIG3_ADDR), Some(0xEC));
    }

    #[test]
    fn read_returns_third_response_byte() {
        let spi = MockSpi::new();
        let bus = SpiBus::new(Box::new(spi.clone()));
        assert_eq!(bus.read_single(REG_ID_ADDR).unwrap(), 0x92);
        assert_eq!(spi.transactions(), vec![vec![0x20, 0x00, 0x00]]);
    }

    #[test]
    fn open_applies_port_settings() {
        let spi = MockSpi::new();
        let bus = SpiBus::new(Box::new(spi.clone()));
        let settings = SpiSettings { speed_hz: 2_000_000, cs_hold_us: 7, ..Default::default() };

        bus.open(&settings).unwrap();

        assert!(spi.is_open());
        assert_eq!(spi.speed_hz(), 2_000_000);
        assert_eq!(spi.mode(), Some(SpiMode::Mode1));
        assert_eq!(spi.cs_hold_us(), Some(7));
    }

    #[test]
    fn port_faults_surface_as_transport_errors() {
        let spi = MockSpi::new();
        spi.fail_transfers(true);
        let bus = SpiBus::new(Box::new(spi));

        for result in [bus.send_command(CMD_SDATAC), bus.read_single(REG_ID_ADDR).map(|_| ())] {
            let err = result.unwrap_err();
            assert!(err.is_transport(), "unexpected error kind: {:?}", err);
        }
        assert!(bus.read_frame(27).unwrap_err().is_transport());
    }

    #[test]
    fn empty_multi_write_is_rejected_before_touching_the_bus() {
        let spi = MockSpi::new();
        let bus = SpiBus::new(Box::new(spi.clone()));
        assert!(matches!(
            bus.write_multiple(CH1SET_ADDR, &[]),
            Err(DriverError::ConfigurationError(_))
        ));
        assert!(spi.transactions().is_empty());
    }
}
