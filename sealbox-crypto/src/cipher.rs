//! Content encryption using ChaCha20-Poly1305.
//!
//! A blob carries its own nonce: the wire form is the 96-bit nonce followed
//! by the ciphertext with the auth tag appended. A failed decryption means a
//! wrong key or tampered data and is always an error, never a fallback.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SecretKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of the nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An encrypted blob in its wire form: nonce, then ciphertext and tag.
///
/// Serializes as its base64 form, which is also what the storage layer and
/// the remote carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherBlob {
    bytes: Vec<u8>,
}

impl CipherBlob {
    /// Wraps wire bytes, checking that a nonce and a tag fit.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption("blob too short".to_string()));
        }
        Ok(Self { bytes })
    }

    /// The wire form.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn nonce(&self) -> &[u8] {
        &self.bytes[..NONCE_SIZE]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.bytes[NONCE_SIZE..]
    }

    /// Encodes to base64 for storage.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Decodes from base64.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;
        Self::from_bytes(bytes)
    }
}

impl Serialize for CipherBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for CipherBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Encrypts plaintext under a symmetric key with a fresh random nonce.
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> CryptoResult<CipherBlob> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut bytes = vec![0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&bytes), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    bytes.extend_from_slice(&ciphertext);

    CipherBlob::from_bytes(bytes)
}

/// Decrypts a blob under a symmetric key.
///
/// Fails with an integrity error on a wrong key or tampered data.
pub fn decrypt(key: &SecretKey, blob: &CipherBlob) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(blob.nonce()), blob.ciphertext())
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
        })
}

/// Encrypts a string and returns the base64-encoded blob.
pub fn encrypt_string(key: &SecretKey, plaintext: &str) -> CryptoResult<String> {
    Ok(encrypt(key, plaintext.as_bytes())?.to_base64())
}

/// Decrypts a base64-encoded blob into a string.
pub fn decrypt_string(key: &SecretKey, encoded: &str) -> CryptoResult<String> {
    let blob = CipherBlob::from_base64(encoded)?;
    let plaintext = decrypt(key, &blob)?;
    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
}
