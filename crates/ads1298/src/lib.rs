pub mod types;
pub mod codec;
pub mod registers;
pub mod hal;
pub mod spi_bus;
pub mod acquisition;
pub mod settings;
pub mod driver;
pub mod builder;
pub mod mock_hal;
pub mod simulation;
#[cfg(feature = "pi-hardware")]
pub mod rppal_hal;

// Re-export the main types that users need
pub use acquisition::{AcquisitionStats, Subscriber};
pub use builder::Ads1298DriverBuilder;
pub use driver::Ads1298Driver;
pub use settings::{DriverSettings, PinMap, SpiSettings, StartupTiming, TransportKind};
pub use spi_bus::RegisterImage;
pub use types::{ConfigError, DeviceState, DriverError};

pub use exg_types::{DecodedSample, DeviceConfig, FrameError, FrameEvent};
