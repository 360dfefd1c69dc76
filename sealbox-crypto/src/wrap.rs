//! Key wrapping.
//!
//! Keys move between parties in wrapped form only:
//!
//! - **Symmetric wrap** — a key encrypted under another symmetric key
//!   (share key under the local at-rest key, item key under a share key).
//! - **Sealed wrap** — a key sealed to an address's X25519 public key
//!   (keys delivered by the remote, keys re-wrapped for an invitee). The
//!   sealed form is anonymous: only the recipient's secret key opens it.

use crate::cipher::{self, CipherBlob};
use crate::error::{CryptoError, CryptoResult};
use crate::key::SecretKey;
use crypto_box::{PublicKey, SecretKey as BoxSecretKey};
use serde::{Deserialize, Serialize};

/// Size of X25519 keys in bytes.
pub const ADDRESS_KEY_SIZE: usize = 32;

/// A key wrapped under a symmetric key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrappedKey(CipherBlob);

impl WrappedKey {
    /// Wraps raw wire bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        Ok(Self(CipherBlob::from_bytes(bytes)?))
    }

    /// The wire form (what key-packet signatures cover).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Base64 form for storage.
    #[must_use]
    pub fn to_base64(&self) -> String {
        self.0.to_base64()
    }

    /// Parses the base64 storage form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        Ok(Self(CipherBlob::from_base64(encoded)?))
    }
}

/// Wraps `key` under `wrapping_key`.
pub fn wrap_key(wrapping_key: &SecretKey, key: &SecretKey) -> CryptoResult<WrappedKey> {
    Ok(WrappedKey(cipher::encrypt(wrapping_key, key.as_bytes())?))
}

/// Unwraps a key previously wrapped with [`wrap_key`].
pub fn unwrap_key(wrapping_key: &SecretKey, wrapped: &WrappedKey) -> CryptoResult<SecretKey> {
    let bytes = cipher::decrypt(wrapping_key, &wrapped.0)?;
    SecretKey::from_slice(&bytes)
}

/// A key sealed to an address public key (anonymous sealed box).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedKey(Vec<u8>);

impl SealedKey {
    /// Wraps raw sealed-box bytes (as received from the remote).
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the sealed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 form for storage.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(&self.0)
    }

    /// Parses the base64 storage form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Envelope(format!("invalid base64: {e}")))?;
        Ok(Self(bytes))
    }
}

/// An X25519 keypair belonging to one user address.
///
/// The secret half stays on the device; the public half is what other
/// parties (the remote, inviters) seal keys to.
#[derive(Clone)]
pub struct AddressKeypair {
    secret: BoxSecretKey,
}

impl AddressKeypair {
    /// Generates a fresh address keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            secret: BoxSecretKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Restores a keypair from the raw 32-byte secret.
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; ADDRESS_KEY_SIZE]) -> Self {
        Self {
            secret: BoxSecretKey::from(bytes),
        }
    }

    /// Returns the raw secret bytes (for at-rest storage, wrapped elsewhere).
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; ADDRESS_KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Returns the public half.
    #[must_use]
    pub fn public_key(&self) -> AddressPublicKey {
        AddressPublicKey(self.secret.public_key())
    }

    /// Opens a key sealed to this address.
    pub fn open_sealed_key(&self, sealed: &SealedKey) -> CryptoResult<SecretKey> {
        let bytes = self
            .secret
            .unseal(sealed.as_bytes())
            .map_err(|_| CryptoError::Envelope("sealed box open failed".to_string()))?;
        SecretKey::from_slice(&bytes)
    }
}

impl std::fmt::Debug for AddressKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressKeypair")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// The public half of an address keypair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressPublicKey(PublicKey);

impl AddressPublicKey {
    /// Parses a public key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != ADDRESS_KEY_SIZE {
            return Err(CryptoError::InvalidPublicKey);
        }
        let mut array = [0u8; ADDRESS_KEY_SIZE];
        array.copy_from_slice(bytes);
        Ok(Self(PublicKey::from(array)))
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ADDRESS_KEY_SIZE] {
        *self.0.as_bytes()
    }

    /// Seals `key` to this address. Only the address's secret key opens it.
    pub fn seal_key(&self, key: &SecretKey) -> CryptoResult<SealedKey> {
        let sealed = self
            .0
            .seal(&mut rand::rngs::OsRng, key.as_bytes())
            .map_err(|_| CryptoError::Envelope("sealed box encryption failed".to_string()))?;
        Ok(SealedKey(sealed))
    }
}
