//! Sample and event types delivered to subscribers.

use crate::error::FrameError;

/// Decoded content of the 24-bit status word that opens every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    /// Bits 23..20 carry the 1100b sentinel
    pub in_sync: bool,
    /// LOFF_STATP: one bit per positive electrode
    pub lead_off_positive: u8,
    /// LOFF_STATN: one bit per negative electrode
    pub lead_off_negative: u8,
}

/// One frame turned into physical values.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    /// Lead-off flags of the positive inputs
    pub lead_off_positive: u8,
    /// Lead-off flags of the negative inputs
    pub lead_off_negative: u8,
    /// Channel voltages in volts, in channel order
    pub channel_values: Vec<f64>,
}

impl DecodedSample {
    pub fn channel_count(&self) -> usize {
        self.channel_values.len()
    }

    /// True when any electrode reports lead-off.
    pub fn any_lead_off(&self) -> bool {
        self.lead_off_positive != 0 || self.lead_off_negative != 0
    }
}

/// What a subscriber receives once per ready signal while streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Sample(DecodedSample),
    Error(FrameError),
}

impl FrameEvent {
    pub fn sample(&self) -> Option<&DecodedSample> {
        match self {
            FrameEvent::Sample(sample) => Some(sample),
            FrameEvent::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FrameEvent::Error(_))
    }
}

impl From<Result<DecodedSample, FrameError>> for FrameEvent {
    fn from(result: Result<DecodedSample, FrameError>) -> Self {
        match result {
            Ok(sample) => FrameEvent::Sample(sample),
            Err(e) => FrameEvent::Error(e),
        }
    }
}
