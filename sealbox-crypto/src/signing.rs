//! Ed25519 signing capability.
//!
//! The engine treats signatures as opaque: it only ever calls sign and
//! verify. Each share carries one signing capability used for key packets
//! and invite assertions.

use crate::error::{CryptoError, CryptoResult};
use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey as DalekSigningKey,
    Verifier as _, VerifyingKey as DalekVerifyingKey,
};
use rand::rngs::OsRng;

/// Ed25519 signature bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(DalekSignature);

impl Signature {
    /// Creates a signature from the raw 64-byte value.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(DalekSignature::from_bytes(bytes))
    }

    /// Returns the raw 64-byte signature.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

/// The verifying (public) half of a signing capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey(DalekVerifyingKey);

impl VerifyingKey {
    /// Parses a verifying key from the raw 32-byte public key.
    pub fn from_bytes(bytes: &[u8; 32]) -> CryptoResult<Self> {
        DalekVerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Returns the raw 32-byte public key.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Base64 form for storage and transport.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(self.to_bytes())
    }

    /// Parses the base64 storage form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&array)
    }

    /// Verifies a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

/// An opaque sign/verify capability.
pub struct SigningCapability {
    signing: DalekSigningKey,
}

impl SigningCapability {
    /// Generates a fresh capability.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: DalekSigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a capability from the raw 32-byte secret.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: DalekSigningKey::from_bytes(bytes),
        }
    }

    /// Returns the raw 32-byte secret.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message))
    }

    /// Returns the verifying half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.signing.verifying_key())
    }
}

impl std::fmt::Debug for SigningCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCapability")
            .field("signing", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let cap = SigningCapability::generate();
        let sig = cap.sign(b"key packet");
        assert!(cap.verifying_key().verify(b"key packet", &sig).is_ok());
    }

    #[test]
    fn wrong_message_fails() {
        let cap = SigningCapability::generate();
        let sig = cap.sign(b"correct");
        assert!(cap.verifying_key().verify(b"wrong", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let a = SigningCapability::generate();
        let b = SigningCapability::generate();
        let sig = a.sign(b"message");
        assert!(b.verifying_key().verify(b"message", &sig).is_err());
    }

    #[test]
    fn capability_bytes_roundtrip() {
        let cap = SigningCapability::generate();
        let restored = SigningCapability::from_bytes(&cap.to_bytes());
        let sig = restored.sign(b"test");
        assert!(cap.verifying_key().verify(b"test", &sig).is_ok());
    }
}
