//! Main driver implementation for the ADS1298 chip.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::Receiver;
use log::{debug, error, info, log_enabled, warn, Level as LogLevel};

use exg_types::{DeviceConfig, FrameEvent};

use crate::acquisition::{AcquisitionPipeline, AcquisitionStats, Subscriber, SubscriberRegistry};
use crate::hal::{Direction, GpioPort, Level, SpiPort};
use crate::registers::*;
use crate::settings::DriverSettings;
use crate::simulation::SampleClock;
use crate::spi_bus::{RegisterImage, SpiBus};
use crate::types::{ConfigError, DeviceState, DriverError, SharedState};

/// Channel setup applied when a stream starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    /// Electrode inputs with lead-off detection and optional bias drive
    Exg,
    /// Internal test signal on every channel
    Test,
}

/// ADS1298 driver.
///
/// Control calls take `&mut self` and run on the caller's thread. Frames are
/// read on the data-ready context chosen by the GPIO port and handed to the
/// registered subscribers.
pub struct Ads1298Driver {
    settings: DriverSettings,
    config: DeviceConfig,
    bus: Arc<SpiBus>,
    gpio: Box<dyn GpioPort>,
    state: Arc<SharedState>,
    clock: SampleClock,
    subscribers: Arc<SubscriberRegistry>,
    pipeline: Arc<AcquisitionPipeline>,
}

impl Ads1298Driver {
    /// Create a powered-down driver over the given transports.
    pub fn new(
        settings: DriverSettings,
        spi: Box<dyn SpiPort>,
        gpio: Box<dyn GpioPort>,
    ) -> Result<Self, DriverError> {
        let clock = SampleClock::new(settings.device.sampling_rate);
        Self::with_clock(settings, spi, gpio, clock)
    }

    /// Like [`Ads1298Driver::new`], sharing `clock` with transports that need
    /// the sampling rate or the driver-alive flag.
    pub fn with_clock(
        settings: DriverSettings,
        spi: Box<dyn SpiPort>,
        gpio: Box<dyn GpioPort>,
        clock: SampleClock,
    ) -> Result<Self, DriverError> {
        settings.validate()?;

        let config = settings.device;
        let bus = Arc::new(SpiBus::new(spi));
        let state = Arc::new(SharedState::new(DeviceState::PoweredDown));
        let subscribers = Arc::new(SubscriberRegistry::new());
        let pipeline = Arc::new(AcquisitionPipeline::new(
            bus.clone(),
            state.clone(),
            subscribers.clone(),
            config.channel_count as usize,
        ));
        clock.set_rate_hz(config.sampling_rate);
        clock.set_alive(false);

        info!("Ads1298Driver created with config: {:?}", config);

        Ok(Self {
            settings,
            config,
            bus,
            gpio,
            state,
            clock,
            subscribers,
            pipeline,
        })
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn config(&self) -> DeviceConfig {
        self.config
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Last value written to each register.
    pub fn register_image(&self) -> RegisterImage {
        self.bus.register_image()
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.pipeline.stats()
    }

    /// Power up, reset and identify the chip, then arm the data-ready handler.
    ///
    /// On any failure the transports are released and the driver stays
    /// powered down.
    pub fn open(&mut self) -> Result<(), DriverError> {
        let state = self.state.get();
        if state != DeviceState::PoweredDown {
            return Err(ConfigError::InvalidState(state).into());
        }

        self.state.set(DeviceState::Resetting);
        self.clock.set_alive(true);

        if let Err(e) = self.startup().and_then(|_| self.arm_data_ready()) {
            error!("ADS1298 startup failed: {}", e);
            if let Err(release_err) = self.release() {
                warn!("Error releasing resources after failed startup: {}", release_err);
            }
            self.state.set(DeviceState::PoweredDown);
            return Err(e);
        }

        self.state.set(DeviceState::Idle);
        info!("ADS1298 ready");
        Ok(())
    }

    /// Change the sampling rate and/or bias drive for the next stream.
    ///
    /// Takes effect on the next `start_*_stream`; no registers are written here.
    pub fn configure(&mut self, sampling_rate: Option<u32>, bias_enabled: Option<bool>) -> Result<(), DriverError> {
        let state = self.state.get();
        if matches!(state, DeviceState::Streaming | DeviceState::Configuring) {
            return Err(ConfigError::InvalidState(state).into());
        }
        if let Some(rate) = sampling_rate {
            sampling_rate_to_config1(rate)?;
        }

        if let Some(rate) = sampling_rate {
            self.config.sampling_rate = rate;
            self.clock.set_rate_hz(rate);
        }
        if let Some(bias) = bias_enabled {
            self.config.bias_enabled = bias;
        }
        info!("Device configuration updated: {:?}", self.config);
        Ok(())
    }

    /// Add a subscriber. Subscribers are never removed.
    pub fn register_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.register(subscriber);
        debug!("Subscriber registered ({} total)", self.subscribers.len());
    }

    /// Register a bounded channel subscriber and return its receiving end.
    ///
    /// Events are dropped with a warning when the channel is full.
    pub fn subscribe(&self, capacity: usize) -> Receiver<FrameEvent> {
        let (tx, rx) = flume::bounded(capacity);
        self.register_subscriber(Subscriber::channel(tx));
        rx
    }

    pub fn start_exg_stream(&mut self) -> Result<(), DriverError> {
        self.start_stream(StreamMode::Exg)
    }

    pub fn start_test_stream(&mut self) -> Result<(), DriverError> {
        self.start_stream(StreamMode::Test)
    }

    fn start_stream(&mut self, mode: StreamMode) -> Result<(), DriverError> {
        match self.state.get() {
            DeviceState::Idle => {}
            DeviceState::PoweredDown => return Err(DriverError::NotInitialized),
            state => return Err(ConfigError::InvalidState(state).into()),
        }

        self.state.set(DeviceState::Configuring);
        info!("Starting {:?} stream at {} Hz", mode, self.config.sampling_rate);

        if let Err(e) = self.configure_mode(mode).and_then(|_| self.begin_continuous_read()) {
            error!("Failed to start {:?} stream: {}", mode, e);
            if let Err(pin_err) = self.set_pin(self.settings.pins.start, Level::Low) {
                warn!("Could not release START after failed stream start: {}", pin_err);
            }
            self.state.set(DeviceState::Idle);
            return Err(e);
        }

        self.state.set(DeviceState::Streaming);
        info!("Streaming");
        Ok(())
    }

    /// Leave continuous-read mode. A no-op unless streaming.
    pub fn stop_stream(&mut self) -> Result<(), DriverError> {
        if !self.state.is_streaming() {
            debug!("stop_stream called while {}, nothing to do", self.state.get());
            return Ok(());
        }

        // Clear the flag first so the data-ready handler stops reading.
        self.state.set(DeviceState::Idle);
        let start = self.settings.pins.start;
        let result = self
            .bus
            .send_command(CMD_SDATAC)
            .and_then(|_| self.set_pin(start, Level::Low));
        info!("Stream stopped");
        result
    }

    /// Pulse nRESET and leave the chip out of continuous-read mode.
    pub fn reset_device(&mut self) -> Result<(), DriverError> {
        match self.state.get() {
            DeviceState::Idle => {}
            DeviceState::PoweredDown => return Err(DriverError::NotInitialized),
            state => return Err(ConfigError::InvalidState(state).into()),
        }

        self.state.set(DeviceState::Resetting);
        let result = self.toggle_reset().and_then(|_| self.bus.send_command(CMD_SDATAC));
        self.state.set(DeviceState::Idle);
        result
    }

    /// Read one register from the chip. Not available while streaming.
    pub fn read_register(&self, register: u8) -> Result<u8, DriverError> {
        match self.state.get() {
            DeviceState::PoweredDown => Err(DriverError::NotInitialized),
            DeviceState::Streaming => Err(ConfigError::InvalidState(DeviceState::Streaming).into()),
            _ => self.bus.read_single(register),
        }
    }

    /// Stop any stream and release the bus and GPIO. Safe to call twice.
    pub fn close(&mut self) -> Result<(), DriverError> {
        if self.state.get() == DeviceState::PoweredDown {
            return Ok(());
        }
        info!("Shutting down ADS1298 driver");

        if let Err(e) = self.stop_stream() {
            warn!("Error stopping stream during shutdown: {}", e);
        }
        let result = self.release();
        self.state.set(DeviceState::PoweredDown);
        result
    }

    fn startup(&mut self) -> Result<(), DriverError> {
        self.bus.open(&self.settings.spi)?;

        let pins = self.settings.pins;
        for pin in [pins.start, pins.reset, pins.power_down] {
            self.gpio
                .configure_pin(pin, Direction::Output, Level::Low)
                .map_err(gpio_error(pin))?;
        }
        self.gpio
            .configure_pin(pins.drdy, Direction::Input, Level::High)
            .map_err(gpio_error(pins.drdy))?;

        self.set_pin(pins.reset, Level::High)?;
        self.set_pin(pins.power_down, Level::High)?;
        debug!("Waiting {:?} for power to settle", self.settings.timing.power_settle());
        sleep(self.settings.timing.power_settle());

        self.toggle_reset()?;

        self.bus.send_command(CMD_SDATAC)?;
        let id = self.bus.read_single(REG_ID_ADDR)?;
        check_device_id(id).map_err(|reason| DriverError::IdentificationError { id, reason })?;
        info!("ADS1298 identified, ID register 0x{:02X}", id);
        Ok(())
    }

    fn arm_data_ready(&mut self) -> Result<(), DriverError> {
        let pipeline = Arc::clone(&self.pipeline);
        let drdy = self.settings.pins.drdy;
        self.gpio
            .register_falling_edge(drdy, Box::new(move || pipeline.on_data_ready()))
            .map_err(gpio_error(drdy))
    }

    /// Release transports in order. Every step runs; the first error is returned.
    fn release(&mut self) -> Result<(), DriverError> {
        self.clock.set_alive(false);
        let drdy = self.settings.pins.drdy;

        let results = [
            self.gpio.clear_falling_edge(drdy).map_err(gpio_error(drdy)),
            self.bus.close(),
            self.gpio.cleanup().map_err(|e| DriverError::GpioError(format!("cleanup: {}", e))),
        ];
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                warn!("Error while releasing driver resources: {}", e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn configure_mode(&mut self, mode: StreamMode) -> Result<(), DriverError> {
        self.reset_ongoing_state()?;
        match mode {
            StreamMode::Exg => self.setup_exg_mode()?,
            StreamMode::Test => self.setup_test_mode()?,
        }
        self.log_register_image();
        Ok(())
    }

    fn begin_continuous_read(&mut self) -> Result<(), DriverError> {
        self.set_pin(self.settings.pins.start, Level::High)?;
        self.bus.send_command(CMD_RDATAC)
    }

    /// Baseline register state every mode starts from.
    fn reset_ongoing_state(&mut self) -> Result<(), DriverError> {
        let config1 = sampling_rate_to_config1(self.config.sampling_rate)?;

        self.bus.send_command(CMD_SDATAC)?;
        self.bus.write_single(CONFIG3_ADDR, CONFIG3_IDLE)?;
        self.bus.write_single(CONFIG1_ADDR, config1)?;
        self.bus.write_single(CONFIG2_ADDR, CONFIG2_IDLE)?;
        self.bus.write_single(BIAS_SENSP_ADDR, BIAS_SENS_OFF)?;
        self.bus.write_single(BIAS_SENSN_ADDR, BIAS_SENS_OFF)?;
        self.configure_all_channels(CHN_INPUT_SHORTED)
    }

    fn setup_exg_mode(&mut self) -> Result<(), DriverError> {
        self.bus.write_single(CONFIG2_ADDR, CONFIG2_EXG)?;
        self.configure_all_channels(CHN_EXG_GAIN_12)?;
        self.bus.write_single(BIAS_SENSP_ADDR, BIAS_SENSP_EXG)?;
        self.bus.write_single(BIAS_SENSN_ADDR, BIAS_SENSN_EXG)?;
        self.bus.write_single(WCT1_ADDR, WCT1_EXG)?;
        self.configure_dc_leads_off(true)?;
        if self.config.bias_enabled {
            self.setup_bias_drive()?;
        }
        Ok(())
    }

    fn setup_test_mode(&mut self) -> Result<(), DriverError> {
        self.bus.send_command(CMD_SDATAC)?;
        self.bus.write_single(CONFIG2_ADDR, CONFIG2_TEST)?;
        self.bus.write_single(CONFIG3_ADDR, CONFIG3_TEST)?;
        self.configure_dc_leads_off(false)?;
        self.configure_all_channels(CHN_TEST_SIGNAL)
    }

    fn setup_bias_drive(&mut self) -> Result<(), DriverError> {
        let mask = channel_mask(self.config.channel_count);
        debug!("Bias drive on channels 0b{:08b}", mask);
        self.bus.write_single(BIAS_SENSP_ADDR, mask)?;
        self.bus.write_single(BIAS_SENSN_ADDR, mask)?;
        self.bus.write_single(CONFIG3_ADDR, CONFIG3_BIAS_DRIVE)
    }

    fn configure_dc_leads_off(&mut self, enable: bool) -> Result<(), DriverError> {
        let (loff, sense, config4) = if enable {
            (LOFF_ENABLE, LOFF_SENS_ENABLE, CONFIG4_LOFF_ENABLE)
        } else {
            (LOFF_DISABLE, LOFF_DISABLE, LOFF_DISABLE)
        };
        self.bus.write_single(LOFF_ADDR, loff)?;
        self.bus.write_single(LOFF_SENSP_ADDR, sense)?;
        self.bus.write_single(LOFF_SENSN_ADDR, sense)?;
        self.bus.write_single(LOFF_FLIP_ADDR, sense)?;
        self.bus.write_single(CONFIG4_ADDR, config4)
    }

    fn configure_all_channels(&mut self, value: u8) -> Result<(), DriverError> {
        let values = vec![value; self.config.channel_count as usize];
        self.bus.write_multiple(CH1SET_ADDR, &values)
    }

    fn toggle_reset(&mut self) -> Result<(), DriverError> {
        let reset = self.settings.pins.reset;
        self.set_pin(reset, Level::Low)?;
        sleep(self.settings.timing.reset_pulse());
        self.set_pin(reset, Level::High)?;
        sleep(self.settings.timing.reset_recovery());
        Ok(())
    }

    fn set_pin(&mut self, pin: u8, level: Level) -> Result<(), DriverError> {
        self.gpio.set_level(pin, level).map_err(gpio_error(pin))
    }

    fn log_register_image(&self) {
        if !log_enabled!(LogLevel::Debug) {
            return;
        }
        debug!("Register image:");
        for (addr, value) in self.bus.register_image().iter() {
            debug!("  {:<10} (0x{:02X}) = 0x{:02X}", register_name(addr), addr, value);
        }
    }
}

impl Drop for Ads1298Driver {
    fn drop(&mut self) {
        let state = self.state.get();
        if state != DeviceState::PoweredDown {
            warn!("Ads1298Driver dropped while {}, shutting down", state);
            if let Err(e) = self.close() {
                error!("Error during shutdown on drop: {}", e);
            }
        }
    }
}

fn gpio_error(pin: u8) -> impl Fn(std::io::Error) -> DriverError {
    move |e| DriverError::GpioError(format!("pin {}: {}", pin, e))
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
