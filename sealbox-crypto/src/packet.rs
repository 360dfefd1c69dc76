//! Key packets: a wrapped item key plus an integrity signature.
//!
//! A packet is safe to move through untrusted storage. The signature is
//! verified against the share's verifying key before the wrapped key is
//! ever unwrapped; a bad signature makes the item unreadable.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SecretKey;
use crate::signing::{Signature, SigningCapability, VerifyingKey};
use crate::wrap::{self, WrappedKey};
use serde::{Deserialize, Serialize};

/// A wrapped item key with a signature over the wrapped form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPacket {
    /// The item key, wrapped under a share key.
    pub wrapped_key: WrappedKey,
    /// Ed25519 signature over the wrapped key's wire form.
    pub signature: Vec<u8>,
}

/// Wraps `item_key` under `share_key` and signs the wrapped form.
pub fn seal_item_key(
    share_key: &SecretKey,
    item_key: &SecretKey,
    signer: &SigningCapability,
) -> CryptoResult<KeyPacket> {
    let wrapped_key = wrap::wrap_key(share_key, item_key)?;
    let signature = signer.sign(wrapped_key.as_bytes());
    Ok(KeyPacket {
        wrapped_key,
        signature: signature.to_bytes().to_vec(),
    })
}

/// Verifies a packet's signature, then unwraps the item key.
///
/// The signature check comes first: an unverified packet is never
/// unwrapped, and a failed check is fatal for the item.
pub fn open_item_key(
    share_key: &SecretKey,
    packet: &KeyPacket,
    verifier: &VerifyingKey,
) -> CryptoResult<SecretKey> {
    let raw: [u8; 64] = packet
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verifier
        .verify(packet.wrapped_key.as_bytes(), &Signature::from_bytes(&raw))
        .map_err(|_| CryptoError::SignatureInvalid)?;

    wrap::unwrap_key(share_key, &packet.wrapped_key)
}
