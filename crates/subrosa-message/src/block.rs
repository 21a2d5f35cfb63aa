//! Message Blocks
//!
//! A block is one DHT-stored fragment of an encrypted message. Each block is
//! self-describing: it carries the sender's public key (so the recipient can
//! run the key agreement), the message nonce, and its position in the
//! fragment sequence. Replicas of the same block are byte-identical; only
//! their DHT keys differ.

use serde::{Deserialize, Serialize};
use subrosa_crypto::{constants::NONCE_SIZE, PublicKey};

use crate::error::{CodecError, CodecResult};

/// One encrypted fragment of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Sender's public key, needed for the key agreement on receipt
    pub sender: PublicKey,

    /// Nonce used for the whole message
    pub nonce: [u8; NONCE_SIZE],

    /// Fragment index within the message
    pub seq: u32,

    /// Total fragments in the message
    pub total: u32,

    /// Ciphertext fragment
    pub fragment: Vec<u8>,
}

impl Block {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}
