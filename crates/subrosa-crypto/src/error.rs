//! Crypto error types

use thiserror::Error;

/// Crypto errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material had the wrong length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Nonce had the wrong length
    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption or authentication failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Hex or byte-level encoding error
    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
