//! X25519 Key Agreement
//!
//! Provides the long-term key pair that identifies a messaging participant.
//! The public key is the address other participants target messages at;
//! the shared secret from Diffie-Hellman seeds the per-message symmetric key.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::constants::{SYMMETRIC_KEY_SIZE, X25519_KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::symmetric::SymmetricKey;

/// A static X25519 secret key (long-term participant identity)
#[derive(ZeroizeOnDrop)]
pub struct SecretKey {
    inner: StaticSecret,
}

/// An X25519 public key, used as a messaging address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; X25519_KEY_SIZE],
}

/// A keypair containing both secret and public keys
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

/// Shared secret derived from X25519 key agreement
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// Perform Diffie-Hellman key agreement
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        let their_public = X25519Public::from(their_public.bytes);
        let shared = self.inner.diffie_hellman(&their_public);
        SharedSecret {
            bytes: shared.to_bytes(),
        }
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let public = X25519Public::from(&self.inner);
        PublicKey {
            bytes: public.to_bytes(),
        }
    }

    /// Export raw bytes (use with caution!)
    pub fn to_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        self.inner.to_bytes()
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self::from_bytes(self.to_bytes())
    }
}

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Try to create from a slice
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != X25519_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: X25519_KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; X25519_KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.bytes
    }

    /// Convert to bytes
    pub fn to_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        self.bytes
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..8])
    }
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Create from an existing secret key
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Create from raw secret bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self::from_secret(SecretKey::from_bytes(bytes))
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            secret: self.secret.clone(),
            public: self.public,
        }
    }
}

impl SharedSecret {
    /// Get the shared secret bytes
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }

    /// Derive a message encryption key from the shared secret using HKDF
    pub fn message_key(&self, info: &[u8]) -> SymmetricKey {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hkdf = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        hkdf.expand(info, &mut key).expect("HKDF expand failed");

        SymmetricKey::from_bytes(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_exchange() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let alice_shared = alice.secret.diffie_hellman(&bob.public);
        let bob_shared = bob.secret.diffie_hellman(&alice.public);

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_message_key_derivation() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let shared = alice.secret.diffie_hellman(&bob.public);
        let k1 = shared.message_key(b"subrosa:msg");
        let k2 = shared.message_key(b"subrosa:other");

        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_secret_round_trip() {
        let pair = KeyPair::generate();
        let restored = KeyPair::from_bytes(pair.secret.to_bytes());

        assert_eq!(pair.public, restored.public);
    }

    #[test]
    fn test_public_key_hex() {
        let pair = KeyPair::generate();
        let hex = pair.public.to_hex();
        let parsed = PublicKey::from_hex(&hex).unwrap();

        assert_eq!(pair.public, parsed);
    }
}
