//! DHT error types

use thiserror::Error;

/// DHT errors
#[derive(Debug, Error)]
pub enum DhtError {
    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// No peers in the routing table
    #[error("No peers available")]
    NoPeers,

    /// Value exceeds the storage ceiling
    #[error("Value too large: {size} bytes (limit {limit})")]
    ValueTooLarge { size: usize, limit: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot file is malformed or from an unknown version
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Underlying socket or file IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DHT operations
pub type DhtResult<T> = Result<T, DhtError>;
