//! Shared types for the ADS1298 ExG driver
//!
//! This crate contains the data types exchanged between the driver and its
//! consumers: the device configuration, decoded samples and the per-frame
//! events delivered to subscribers.

pub mod config;
pub mod data;
pub mod error;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use error::*;
