//! Error types for audio conversion

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Unsupported sample rate: {0}")]
    UnsupportedRate(u32),

    #[error("Unsupported channel count: {0} (only mono and stereo are handled)")]
    UnsupportedChannels(u16),

    #[error("Unsupported conversion: {reason}")]
    UnsupportedConversion { reason: String },
}

pub type Result<T> = std::result::Result<T, AudioError>;
