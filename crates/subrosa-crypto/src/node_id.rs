//! Node Identifiers
//!
//! A 160-bit identifier locates both peers and stored values in the overlay
//! key space. Peer IDs are derived from the node's public key; value keys for
//! message blocks are derived from the recipient's public key plus slot and
//! replica indices, so only someone who knows the recipient's public key can
//! enumerate candidate keys.

use serde::{Deserialize, Serialize};

use crate::constants::NODE_ID_SIZE;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::PublicKey;

/// A 160-bit identifier in the overlay key space (truncated BLAKE3 hash)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    bytes: [u8; NODE_ID_SIZE],
}

impl NodeId {
    /// Create NodeId from raw bytes
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self { bytes }
    }

    /// Derive NodeId from a participant's public key
    pub fn from_pubkey(pubkey: &PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"subrosa:node:");
        hasher.update(pubkey.as_bytes());
        Self::truncate(hasher.finalize().as_bytes())
    }

    /// Derive the storage key for message block `slot`, placement `replica`,
    /// addressed to the holder of `recipient`
    pub fn for_block(recipient: &PublicKey, slot: u32, replica: u8) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"subrosa:block:");
        hasher.update(recipient.as_bytes());
        hasher.update(&slot.to_le_bytes());
        hasher.update(&[replica]);
        Self::truncate(hasher.finalize().as_bytes())
    }

    /// Generate a random NodeId (for nodes without a messaging identity)
    pub fn random() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; NODE_ID_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self { bytes }
    }

    fn truncate(hash: &[u8; 32]) -> Self {
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes.copy_from_slice(&hash[..NODE_ID_SIZE]);
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.bytes
    }

    /// XOR distance between two NodeIds
    pub fn distance(&self, other: &NodeId) -> [u8; NODE_ID_SIZE] {
        let mut result = [0u8; NODE_ID_SIZE];
        for i in 0..NODE_ID_SIZE {
            result[i] = self.bytes[i] ^ other.bytes[i];
        }
        result
    }

    /// Get the leading zeros in the XOR distance (for bucket placement)
    pub fn leading_zeros(&self, other: &NodeId) -> u32 {
        let distance = self.distance(other);
        let mut zeros = 0u32;
        for byte in distance {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Interpret the high 64 bits as an integer, for coarse key-space math
    pub fn prefix_u64(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.bytes[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
        if bytes.len() != NODE_ID_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: NODE_ID_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; NODE_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self { bytes: arr })
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
