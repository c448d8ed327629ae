//! Per-frame error type.

use thiserror::Error;

/// Why a single frame could not be turned into a sample.
///
/// These are recoverable: the acquisition path reports them to subscribers
/// and keeps going with the next ready signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The byte count does not match the expected layout
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    /// The status word sentinel (1100b) is missing
    #[error("data stream out of sync (status word 0x{status_word:06X})")]
    OutOfSync { status_word: u32 },
    /// The bus read for the frame failed
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}
