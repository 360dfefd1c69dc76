//! The local user's crypto identity for one unlocked session.

use crate::error::{EngineError, EngineResult};
use sealbox_crypto::{
    unwrap_key, wrap_key, AddressKeypair, SealedKey, SecretKey, SigningCapability, WrappedKey,
};
use sealbox_types::{AddressId, UserId};

/// Everything the engine needs about the local user: ids, the address
/// keypair other parties seal keys to, and the never-transmitted local
/// at-rest key everything persisted on this device is wrapped under.
pub struct UserSession {
    pub user_id: UserId,
    pub address_id: AddressId,
    address_keys: AddressKeypair,
    local_key: SecretKey,
}

impl UserSession {
    pub fn new(
        user_id: UserId,
        address_id: AddressId,
        address_keys: AddressKeypair,
        local_key: SecretKey,
    ) -> Self {
        Self {
            user_id,
            address_id,
            address_keys,
            local_key,
        }
    }

    /// The address keypair for this session.
    pub fn address_keys(&self) -> &AddressKeypair {
        &self.address_keys
    }

    /// Wraps a key under the local at-rest secret, base64 storage form.
    pub fn wrap_for_storage(&self, key: &SecretKey) -> EngineResult<String> {
        let wrapped = wrap_key(&self.local_key, key)
            .map_err(|e| EngineError::InvalidState(format!("local wrap failed: {e}")))?;
        Ok(wrapped.to_base64())
    }

    /// Unwraps a key from its local at-rest storage form.
    pub fn unwrap_from_storage(&self, encoded: &str) -> EngineResult<SecretKey> {
        let wrapped = WrappedKey::from_base64(encoded)
            .map_err(|e| EngineError::InvalidState(format!("corrupt stored key: {e}")))?;
        unwrap_key(&self.local_key, &wrapped)
            .map_err(|e| EngineError::InvalidState(format!("local unwrap failed: {e}")))
    }

    /// Wraps a signing capability's secret for local storage.
    pub fn wrap_signing_capability(&self, cap: &SigningCapability) -> EngineResult<String> {
        self.wrap_for_storage(&SecretKey::from_bytes(cap.to_bytes()))
    }

    /// Restores a signing capability from its local storage form.
    pub fn unwrap_signing_capability(&self, encoded: &str) -> EngineResult<SigningCapability> {
        let secret = self.unwrap_from_storage(encoded)?;
        Ok(SigningCapability::from_bytes(secret.as_bytes()))
    }

    /// Seals a key to this session's own address, the form the remote hands
    /// back on other devices and forwards to invitees.
    pub fn seal_to_self(&self, key: &SecretKey) -> EngineResult<SealedKey> {
        self.address_keys
            .public_key()
            .seal_key(key)
            .map_err(|e| EngineError::InvalidState(format!("self-seal failed: {e}")))
    }
}
