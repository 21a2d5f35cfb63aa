//! Subrosa Cryptographic Primitives
//!
//! This crate provides all cryptographic operations for the Subrosa overlay:
//! - Key agreement (X25519) between messaging participants
//! - Symmetric encryption (ChaCha20-Poly1305)
//! - Node identifiers (truncated BLAKE3) with the XOR metric
//! - Key derivation (HKDF-SHA256)

pub mod error;
pub mod keys;
pub mod node_id;
pub mod symmetric;

pub use error::{CryptoError, CryptoResult};
pub use keys::{KeyPair, PublicKey, SecretKey, SharedSecret};
pub use node_id::NodeId;
pub use symmetric::{decrypt, encrypt, Nonce, SymmetricKey};

/// Protocol constants
pub mod constants {
    /// X25519 key size in bytes
    pub const X25519_KEY_SIZE: usize = 32;

    /// ChaCha20-Poly1305 key size
    pub const SYMMETRIC_KEY_SIZE: usize = 32;

    /// ChaCha20-Poly1305 nonce size
    pub const NONCE_SIZE: usize = 12;

    /// Poly1305 authentication tag size
    pub const AUTH_TAG_SIZE: usize = 16;

    /// Node ID size (truncated BLAKE3 hash)
    pub const NODE_ID_SIZE: usize = 20;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_crypto_flow() {
        // Two participants agree on a secret and exchange one sealed payload
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let message = b"meet me under the rose";

        let key = alice
            .secret
            .diffie_hellman(&bob.public)
            .message_key(b"subrosa:test");
        let nonce = Nonce::generate();
        let sealed = encrypt(&key, &nonce, message).unwrap();

        let key_b = bob
            .secret
            .diffie_hellman(&alice.public)
            .message_key(b"subrosa:test");
        let opened = decrypt(&key_b, &nonce, &sealed).unwrap();

        assert_eq!(opened, message);
    }

    #[test]
    fn test_node_id_follows_identity() {
        let pair = KeyPair::generate();
        let id1 = NodeId::from_pubkey(&pair.public);
        let id2 = NodeId::from_pubkey(&pair.public);
        assert_eq!(id1, id2);

        let other = KeyPair::generate();
        assert_ne!(id1, NodeId::from_pubkey(&other.public));
    }
}
