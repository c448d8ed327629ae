//! Device configuration shared by the driver and its callers.

use serde::{Deserialize, Serialize};

/// Sampling rates the chip can be programmed to, in Hz.
pub const SUPPORTED_SAMPLING_RATES: [u32; 4] = [500, 1000, 2000, 4000];

/// Largest number of channels on a single ADS1298.
pub const MAX_CHANNELS: u8 = 8;

/// Tunables of the acquisition front end. Gain is fixed and not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of channels carried in each frame (1..=8)
    #[serde(default = "default_channel_count")]
    pub channel_count: u8,
    /// Output data rate in Hz
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    /// Drive the bias electrode from all active channels
    #[serde(default)]
    pub bias_enabled: bool,
}

fn default_channel_count() -> u8 { MAX_CHANNELS }
fn default_sampling_rate() -> u32 { 500 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channel_count: default_channel_count(),
            sampling_rate: default_sampling_rate(),
            bias_enabled: false,
        }
    }
}

impl DeviceConfig {
    /// Length in bytes of one frame: a 3-byte status word plus 3 bytes per channel.
    pub fn frame_len(&self) -> usize {
        frame_len(self.channel_count as usize)
    }
}

/// Frame length for a given channel count.
pub fn frame_len(channel_count: usize) -> usize {
    3 + 3 * channel_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_board() {
        let config = DeviceConfig::default();
        assert_eq!(config.channel_count, 8);
        assert_eq!(config.sampling_rate, 500);
        assert!(!config.bias_enabled);
        assert_eq!(config.frame_len(), 27);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: DeviceConfig = serde_json::from_str(r#"{"channel_count": 4}"#).unwrap();
        assert_eq!(config.channel_count, 4);
        assert_eq!(config.sampling_rate, 500);
        assert_eq!(config.frame_len(), 15);
    }
}
