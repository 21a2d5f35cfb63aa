//! Codec error types

use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying crypto failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] subrosa_crypto::CryptoError),

    /// Block serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A message would exceed the supported slot range
    #[error("Message too large: {blocks} blocks from slot {first_slot}")]
    MessageTooLarge { blocks: usize, first_slot: u32 },
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
