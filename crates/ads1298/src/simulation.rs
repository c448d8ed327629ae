//! Offline transports producing synthetic ADS1298 data.
//!
//! `SimulatedSpi` behaves like a chip in continuous-read mode: identity reads
//! report an ADS1298 and every frame read returns an in-sync frame with a
//! small sinusoid plus Gaussian noise on each channel. `SimulatedGpio` stands
//! in for the data-ready interrupt with a tick thread running at the
//! configured sample interval, so samples flow through the exact same
//! acquisition path as on hardware.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thread_priority::ThreadPriority;

use crate::codec::SCALE_TO_VOLTS;
use crate::hal::{Direction, EdgeHandler, GpioPort, Level, SpiMode, SpiPort};
use crate::mock_hal::ADS1298_ID;
use crate::registers::{REG_ID_ADDR, RREG, WREG};

/// Sampling rate and liveness shared between the driver and the simulator.
#[derive(Debug, Clone)]
pub struct SampleClock {
    rate_hz: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
}

impl SampleClock {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: Arc::new(AtomicU32::new(rate_hz)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn rate_hz(&self) -> u32 {
        self.rate_hz.load(Ordering::Relaxed)
    }

    pub fn set_rate_hz(&self, rate_hz: u32) {
        self.rate_hz.store(rate_hz, Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.rate_hz().max(1) as u64)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }
}

// Synthetic signal shape
const NOISE_STD_VOLTS: f64 = 5e-6;
const SINE_AMPLITUDE_VOLTS: f64 = 50e-6;
const FULL_SCALE_CODE: i32 = (1 << 23) - 1;

/// SPI port answering like an ADS1298 streaming in continuous-read mode.
pub struct SimulatedSpi {
    clock: SampleClock,
    registers: HashMap<u8, u8>,
    rng: StdRng,
    sample_index: u64,
}

impl SimulatedSpi {
    pub fn new(clock: SampleClock) -> Self {
        let mut registers = HashMap::new();
        registers.insert(REG_ID_ADDR, ADS1298_ID);
        Self {
            clock,
            registers,
            rng: StdRng::from_entropy(),
            sample_index: 0,
        }
    }

    fn synthetic_frame(&mut self, len: usize) -> Vec<u8> {
        let t = self.sample_index as f64 / self.clock.rate_hz().max(1) as f64;
        self.sample_index += 1;

        let mut frame = Vec::with_capacity(len);
        frame.extend_from_slice(&[0xC0, 0x00, 0x00]);
        let channels = len.saturating_sub(3) / 3;
        for ch in 0..channels {
            // channel 0: 2 Hz, channel 1: 6 Hz, ...
            let freq = 2.0 + 4.0 * ch as f64;
            let noise: f64 = self.rng.sample(StandardNormal);
            let volts = SINE_AMPLITUDE_VOLTS * (2.0 * PI * freq * t).sin() + NOISE_STD_VOLTS * noise;
            let code = ((volts / SCALE_TO_VOLTS) as i32).clamp(-FULL_SCALE_CODE, FULL_SCALE_CODE);
            frame.extend_from_slice(&encode_signed_24(code));
        }
        frame.resize(len, 0);
        frame
    }
}

fn encode_signed_24(code: i32) -> [u8; 3] {
    let raw = code as u32;
    [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]
}

impl SpiPort for SimulatedSpi {
    fn open(&mut self, bus: u8, device: u8) -> Result<(), io::Error> {
        info!("Simulated SPI {}.{} opened, no hardware is accessed", bus, device);
        Ok(())
    }

    fn set_speed(&mut self, _hz: u32) -> Result<(), io::Error> {
        Ok(())
    }

    fn set_mode(&mut self, _mode: SpiMode) -> Result<(), io::Error> {
        Ok(())
    }

    fn set_cs_hold(&mut self, _micros: u16) -> Result<(), io::Error> {
        Ok(())
    }

    fn transfer(&mut self, write: &[u8]) -> Result<Vec<u8>, io::Error> {
        let mut read = vec![0u8; write.len()];
        match write {
            [op, 0x00, 0x00] if op & 0xE0 == RREG => {
                read[2] = self.registers.get(&(op & 0x1F)).copied().unwrap_or(0);
            }
            [op, _count, values @ ..] if op & 0xE0 == WREG => {
                let base = op & 0x1F;
                for (offset, &value) in values.iter().enumerate() {
                    self.registers.insert(base + offset as u8, value);
                }
            }
            _ if write.len() > 3 && write.iter().all(|&b| b == 0) => {
                read = self.synthetic_frame(write.len());
            }
            _ => {}
        }
        Ok(read)
    }

    fn close(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

struct Ticker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// GPIO port whose data-ready edges come from a tick thread.
pub struct SimulatedGpio {
    clock: SampleClock,
    pins: HashMap<u8, Level>,
    tickers: HashMap<u8, Ticker>,
}

impl SimulatedGpio {
    pub fn new(clock: SampleClock) -> Self {
        Self {
            clock,
            pins: HashMap::new(),
            tickers: HashMap::new(),
        }
    }

    fn stop_ticker(&mut self, pin: u8) {
        if let Some(ticker) = self.tickers.remove(&pin) {
            ticker.running.store(false, Ordering::Release);
            if ticker.handle.join().is_err() {
                warn!("Simulated data-ready thread for pin {} panicked", pin);
            }
        }
    }
}

impl GpioPort for SimulatedGpio {
    fn configure_pin(&mut self, pin: u8, direction: Direction, initial: Level) -> Result<(), io::Error> {
        debug!("Simulated pin {} configured as {:?} ({:?})", pin, direction, initial);
        self.pins.insert(pin, initial);
        Ok(())
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), io::Error> {
        self.pins.insert(pin, level);
        Ok(())
    }

    fn register_falling_edge(&mut self, pin: u8, handler: EdgeHandler) -> Result<(), io::Error> {
        self.stop_ticker(pin);

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let clock = self.clock.clone();
        let handle = thread::Builder::new()
            .name("ads1298_sim".into())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                    warn!("Failed to set simulator thread priority: {:?}", e);
                }
                info!("Simulated data-ready source started at {} Hz", clock.rate_hz());

                let mut next = Instant::now();
                while clock.is_alive() && thread_running.load(Ordering::Acquire) {
                    next += clock.interval();
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                    handler();
                }
                info!("Simulated data-ready source stopped");
            })?;

        self.tickers.insert(pin, Ticker { running, handle });
        Ok(())
    }

    fn clear_falling_edge(&mut self, pin: u8) -> Result<(), io::Error> {
        self.stop_ticker(pin);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), io::Error> {
        let pins: Vec<u8> = self.tickers.keys().copied().collect();
        for pin in pins {
            self.stop_ticker(pin);
        }
        self.pins.clear();
        Ok(())
    }
}

impl Drop for SimulatedGpio {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_frame;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn synthetic_frames_are_in_sync_and_small() {
        let mut spi = SimulatedSpi::new(SampleClock::new(500));
        for _ in 0..100 {
            let frame = spi.transfer(&[0u8; 27]).unwrap();
            let sample = decode_frame(&frame, 8).unwrap();
            assert!(!sample.any_lead_off());
            assert!(sample.channel_values.iter().all(|v| v.abs() < 1e-3));
        }
    }

    #[test]
    fn identity_read_reports_ads1298() {
        let mut spi = SimulatedSpi::new(SampleClock::new(500));
        assert_eq!(spi.transfer(&[0x20, 0x00, 0x00]).unwrap()[2], ADS1298_ID);
    }

    #[test]
    fn ticker_stops_when_clock_dies() {
        let clock = SampleClock::new(4000);
        let mut gpio = SimulatedGpio::new(clock.clone());
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        gpio.register_falling_edge(23, Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        clock.set_alive(false);
        gpio.clear_falling_edge(23).unwrap();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop > 0, "no ticks delivered");

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }
}
