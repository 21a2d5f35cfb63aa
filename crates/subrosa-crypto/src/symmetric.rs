//! Symmetric Encryption (ChaCha20-Poly1305)
//!
//! Authenticated encryption for message payloads. One key and nonce pair
//! covers a whole logical message before it is split into blocks.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce as ChaNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{AUTH_TAG_SIZE, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};

/// A 256-bit symmetric key for ChaCha20-Poly1305
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

/// A 96-bit nonce for ChaCha20-Poly1305
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl SymmetricKey {
    /// Create a key from raw bytes
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }
}

impl Nonce {
    /// Create a nonce from raw bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self { bytes }
    }

    /// Try to create from a slice
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; NONCE_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Generate a random nonce
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }

    /// Convert to bytes
    pub fn to_bytes(&self) -> [u8; NONCE_SIZE] {
        self.bytes
    }
}

/// Encrypt plaintext using ChaCha20-Poly1305
///
/// Returns ciphertext with authentication tag appended (16 bytes longer than input)
pub fn encrypt(key: &SymmetricKey, nonce: &Nonce, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let cha_nonce = ChaNonce::from_slice(&nonce.bytes);

    cipher
        .encrypt(cha_nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("ChaCha20-Poly1305 encryption failed".into()))
}

/// Decrypt ciphertext using ChaCha20-Poly1305
///
/// Input should include the 16-byte authentication tag at the end
pub fn decrypt(key: &SymmetricKey, nonce: &Nonce, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < AUTH_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let cha_nonce = ChaNonce::from_slice(&nonce.bytes);

    cipher
        .decrypt(cha_nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = SymmetricKey::generate();
        let nonce = Nonce::generate();
        let plaintext = b"Hello, Subrosa!";

        let ciphertext = encrypt(&key, &nonce, plaintext).unwrap();
        assert_ne!(ciphertext.as_slice(), plaintext);
        assert_eq!(ciphertext.len(), plaintext.len() + AUTH_TAG_SIZE);

        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = SymmetricKey::generate();
        let nonce = Nonce::generate();

        // Even an empty message produces tag-only ciphertext
        let ciphertext = encrypt(&key, &nonce, b"").unwrap();
        assert_eq!(ciphertext.len(), AUTH_TAG_SIZE);

        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = SymmetricKey::generate();
        let key2 = SymmetricKey::generate();
        let nonce = Nonce::generate();

        let ciphertext = encrypt(&key1, &nonce, b"Test message").unwrap();
        assert!(decrypt(&key2, &nonce, &ciphertext).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = SymmetricKey::generate();
        let nonce = Nonce::generate();

        let mut ciphertext = encrypt(&key, &nonce, b"Test message").unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(decrypt(&key, &nonce, &ciphertext).is_err());
    }
}
