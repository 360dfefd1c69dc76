//! Encryption layer for the Sealbox client engine.
//!
//! This crate is the crypto boundary: everything above it handles keys
//! only in wrapped form. It provides:
//!
//! - ChaCha20-Poly1305 authenticated encryption for content
//! - Zeroizing 256-bit symmetric keys and Argon2id derivation of the
//!   never-transmitted local at-rest key
//! - Symmetric key wrapping (share keys at rest, item keys under share keys)
//! - Sealed-box wrapping to X25519 address keys (keys in transit)
//! - An opaque Ed25519 sign/verify capability and signed key packets

mod cipher;
mod error;
mod key;
mod packet;
mod signing;
mod wrap;

pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, CipherBlob, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_local_key, KdfParams, Salt, SecretKey, KEY_SIZE, SALT_SIZE};
pub use packet::{open_item_key, seal_item_key, KeyPacket};
pub use signing::{Signature, SigningCapability, VerifyingKey};
pub use wrap::{
    unwrap_key, wrap_key, AddressKeypair, AddressPublicKey, SealedKey, WrappedKey,
    ADDRESS_KEY_SIZE,
};
