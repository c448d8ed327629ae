//! Scriptable in-memory transports for tests.
//!
//! Both mocks are cheap clones over shared state: hand one clone to the
//! driver and keep another to script responses and inspect what happened.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::hal::{Direction, EdgeHandler, GpioPort, Level, SpiMode, SpiPort};
use crate::registers::{REG_ID_ADDR, RREG, WREG};

/// ID register value of an ADS1298
pub const ADS1298_ID: u8 = 0x92;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct MockSpiInner {
    open: Option<(u8, u8)>,
    speed_hz: u32,
    mode: Option<SpiMode>,
    cs_hold_us: Option<u16>,
    transactions: Vec<Vec<u8>>,
    registers: HashMap<u8, u8>,
    frames: VecDeque<Vec<u8>>,
    fail: bool,
}

/// Mock implementation of the SPI port
///
/// Register writes land in an internal register file, register reads are
/// answered from it, and all-zero transfers (continuous-read frames) are
/// answered from a queue of scripted frames, or zeros once it runs dry.
#[derive(Clone, Default)]
pub struct MockSpi {
    inner: Arc<Mutex<MockSpiInner>>,
}

impl MockSpi {
    /// A port whose ID register reports an ADS1298.
    pub fn new() -> Self {
        let spi = Self::default();
        spi.set_register(REG_ID_ADDR, ADS1298_ID);
        spi
    }

    pub fn set_register(&self, addr: u8, value: u8) {
        lock(&self.inner).registers.insert(addr, value);
    }

    pub fn register(&self, addr: u8) -> Option<u8> {
        lock(&self.inner).registers.get(&addr).copied()
    }

    /// Queue the response to the next frame read.
    pub fn push_frame(&self, frame: Vec<u8>) {
        lock(&self.inner).frames.push_back(frame);
    }

    /// Make every subsequent transfer fail (or succeed again).
    pub fn fail_transfers(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }

    /// Every transfer written so far, in order.
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).transactions.clone()
    }

    pub fn clear_transactions(&self) {
        lock(&self.inner).transactions.clear();
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner).open.is_some()
    }

    pub fn speed_hz(&self) -> u32 {
        lock(&self.inner).speed_hz
    }

    pub fn mode(&self) -> Option<SpiMode> {
        lock(&self.inner).mode
    }

    /// Chip-select hold applied by the bus, if any.
    pub fn cs_hold_us(&self) -> Option<u16> {
        lock(&self.inner).cs_hold_us
    }
}

impl SpiPort for MockSpi {
    fn open(&mut self, bus: u8, device: u8) -> Result<(), io::Error> {
        lock(&self.inner).open = Some((bus, device));
        Ok(())
    }

    fn set_speed(&mut self, hz: u32) -> Result<(), io::Error> {
        lock(&self.inner).speed_hz = hz;
        Ok(())
    }

    fn set_mode(&mut self, mode: SpiMode) -> Result<(), io::Error> {
        lock(&self.inner).mode = Some(mode);
        Ok(())
    }

    fn set_cs_hold(&mut self, micros: u16) -> Result<(), io::Error> {
        lock(&self.inner).cs_hold_us = Some(micros);
        Ok(())
    }

    fn transfer(&mut self, write: &[u8]) -> Result<Vec<u8>, io::Error> {
        let mut inner = lock(&self.inner);
        if inner.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "mock SPI failure"));
        }
        inner.transactions.push(write.to_vec());

        let mut read = vec![0u8; write.len()];
        match write {
            [op, 0x00, 0x00] if op & 0xE0 == RREG => {
                read[2] = inner.registers.get(&(op & 0x1F)).copied().unwrap_or(0);
            }
            [op, count, values @ ..] if op & 0xE0 == WREG && values.len() == *count as usize + 1 => {
                let base = op & 0x1F;
                for (offset, &value) in values.iter().enumerate() {
                    inner.registers.insert(base + offset as u8, value);
                }
            }
            _ if write.len() > 1 && write.iter().all(|&b| b == 0) => {
                if let Some(mut frame) = inner.frames.pop_front() {
                    frame.resize(write.len(), 0);
                    read = frame;
                }
            }
            _ => {}
        }
        Ok(read)
    }

    fn close(&mut self) -> Result<(), io::Error> {
        lock(&self.inner).open = None;
        Ok(())
    }
}

#[derive(Default)]
struct MockGpioInner {
    pins: HashMap<u8, (Direction, Level)>,
    history: Vec<(u8, Level)>,
    handlers: HashMap<u8, Arc<dyn Fn() + Send + Sync>>,
    cleaned_up: bool,
}

/// Mock implementation of the GPIO port
///
/// Edges are delivered only when a test calls [`MockGpio::trigger_falling_edge`],
/// synchronously on the caller's thread.
#[derive(Clone, Default)]
pub struct MockGpio {
    inner: Arc<Mutex<MockGpioInner>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the falling-edge handler of `pin`. Returns false if none is registered.
    pub fn trigger_falling_edge(&self, pin: u8) -> bool {
        // Clone the handler out so it runs without the mock's lock held.
        let handler = lock(&self.inner).handlers.get(&pin).cloned();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        lock(&self.inner).pins.get(&pin).map(|&(_, level)| level)
    }

    pub fn direction(&self, pin: u8) -> Option<Direction> {
        lock(&self.inner).pins.get(&pin).map(|&(direction, _)| direction)
    }

    /// Every level applied to a pin, configuration included, in order.
    pub fn history(&self) -> Vec<(u8, Level)> {
        lock(&self.inner).history.clone()
    }

    pub fn has_edge_handler(&self, pin: u8) -> bool {
        lock(&self.inner).handlers.contains_key(&pin)
    }

    pub fn is_cleaned_up(&self) -> bool {
        lock(&self.inner).cleaned_up
    }
}

impl GpioPort for MockGpio {
    fn configure_pin(&mut self, pin: u8, direction: Direction, initial: Level) -> Result<(), io::Error> {
        let mut inner = lock(&self.inner);
        inner.cleaned_up = false;
        inner.pins.insert(pin, (direction, initial));
        if direction == Direction::Output {
            inner.history.push((pin, initial));
        }
        Ok(())
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), io::Error> {
        let mut inner = lock(&self.inner);
        match inner.pins.get_mut(&pin) {
            Some((Direction::Output, current)) => *current = level,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("pin {} is not configured as output", pin),
                ))
            }
        }
        inner.history.push((pin, level));
        Ok(())
    }

    fn register_falling_edge(&mut self, pin: u8, handler: EdgeHandler) -> Result<(), io::Error> {
        debug!("Mock falling-edge handler registered on pin {}", pin);
        lock(&self.inner).handlers.insert(pin, Arc::from(handler));
        Ok(())
    }

    fn clear_falling_edge(&mut self, pin: u8) -> Result<(), io::Error> {
        lock(&self.inner).handlers.remove(&pin);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), io::Error> {
        let mut inner = lock(&self.inner);
        inner.pins.clear();
        inner.handlers.clear();
        inner.cleaned_up = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn spi_answers_register_reads_from_writes() {
        let mut spi = MockSpi::new();
        spi.transfer(&[0x45, 0x01, 0x60, 0x61]).unwrap();
        assert_eq!(spi.transfer(&[0x26, 0x00, 0x00]).unwrap(), vec![0, 0, 0x61]);
        assert_eq!(spi.transfer(&[0x20, 0x00, 0x00]).unwrap(), vec![0, 0, ADS1298_ID]);
    }

    #[test]
    fn spi_serves_scripted_frames_then_zeros() {
        let mut spi = MockSpi::new();
        spi.push_frame(vec![0xC0, 0, 0, 1, 2, 3]);
        assert_eq!(spi.transfer(&[0; 6]).unwrap(), vec![0xC0, 0, 0, 1, 2, 3]);
        assert_eq!(spi.transfer(&[0; 6]).unwrap(), vec![0; 6]);
    }

    #[test]
    fn gpio_trigger_runs_registered_handler() {
        let mut gpio = MockGpio::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        gpio.register_falling_edge(23, Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(gpio.trigger_falling_edge(23));
        assert!(!gpio.trigger_falling_edge(22));
        gpio.clear_falling_edge(23).unwrap();
        assert!(!gpio.trigger_falling_edge(23));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gpio_rejects_levels_on_unconfigured_pins() {
        let mut gpio = MockGpio::new();
        assert!(gpio.set_level(22, Level::High).is_err());
        gpio.configure_pin(22, Direction::Output, Level::Low).unwrap();
        gpio.set_level(22, Level::High).unwrap();
        assert_eq!(gpio.level(22), Some(Level::High));
        assert_eq!(gpio.history(), vec![(22, Level::Low), (22, Level::High)]);
    }
}
