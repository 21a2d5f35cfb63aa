//! Subrosa Message Codec
//!
//! Turns a plaintext message and a recipient public key into a set of
//! encrypted blocks addressed into the DHT key space, and back. Block keys
//! are derived from the recipient's public key plus a slot index, so a
//! recipient enumerates its own candidate keys without anyone learning a
//! network location. Encoding is a pure transform; only decoding reads
//! through the overlay, via the [`BlockFetch`] seam.

pub mod block;
pub mod codec;
pub mod error;

pub use block::Block;
pub use codec::{decode, encode, encode_from, first_free_slot, replicas_for, BlockFetch};
pub use error::{CodecError, CodecResult};

/// Consecutive empty slots that end the candidate-key probe
pub const MISS_WINDOW: u32 = 3;

/// Most duplicate placements any block ever gets
pub const MAX_REPLICAS: u8 = 3;

/// Ciphertext bytes per block, leaving headroom for the block header
/// under the DHT value-size ceiling
pub const FRAGMENT_SIZE: usize = subrosa_dht::MAX_VALUE_SIZE - 128;
