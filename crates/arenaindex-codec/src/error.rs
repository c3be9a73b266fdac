//! Error types for the codecs.

use thiserror::Error;

/// Errors that can occur while encoding or committing.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("OS entropy source unavailable: {reason}")]
    Entropy { reason: String },

    #[error("Invalid prediction bit string at position {position}: {found:?}")]
    InvalidBitString { position: usize, found: char },

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}
