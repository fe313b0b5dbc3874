//! Error types for wire protocol operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Payload of {len} bytes exceeds the 16-bit length field")]
    PayloadTooLarge { len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
