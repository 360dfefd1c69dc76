//! Share (vault) lifecycle.
//!
//! A share is created remote-first: the rotation-0 key, signing capability
//! and encrypted metadata go to the remote, and only a remote acceptance is
//! followed by one local transaction writing the share row and its key row
//! together. A failure anywhere leaves no partial vault behind.

use crate::error::{EngineError, EngineResult};
use crate::remote::{CreateShareRequest, RemoteApi, RemoteShare};
use crate::session::UserSession;
use crate::share_keys::ShareKeyStore;
use sealbox_crypto::{decrypt_string, encrypt_string, SecretKey, SigningCapability};
use sealbox_storage::{Replica, ShareRow};
use sealbox_types::{KeyRotation, ShareId, ShareRole, SyncScope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Decrypted vault metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Share operations plus a watchable view of the local share list.
pub struct ShareStore {
    replica: Arc<Replica>,
    remote: Arc<dyn RemoteApi>,
    keys: Arc<ShareKeyStore>,
    session: Arc<UserSession>,
    watch_tx: watch::Sender<Vec<ShareRow>>,
}

impl ShareStore {
    pub fn new(
        replica: Arc<Replica>,
        remote: Arc<dyn RemoteApi>,
        keys: Arc<ShareKeyStore>,
        session: Arc<UserSession>,
    ) -> Self {
        let (watch_tx, _) = watch::channel(Vec::new());
        Self {
            replica,
            remote,
            keys,
            session,
            watch_tx,
        }
    }

    /// Creates a new vault owned by the local user.
    pub async fn create_vault(&self, metadata: &ShareMetadata) -> EngineResult<ShareRow> {
        let rotation_key = SecretKey::generate();
        let signer = SigningCapability::generate();
        let encrypted_metadata = encrypt_metadata(&rotation_key, metadata)?;
        let sealed_rotation_key = self.session.seal_to_self(&rotation_key)?;

        let remote_share = self
            .remote
            .create_share(
                self.session.user_id,
                CreateShareRequest {
                    encrypted_metadata,
                    metadata_rotation: KeyRotation::INITIAL,
                    sealed_rotation_key,
                    verifying_key: signer.verifying_key().to_base64(),
                },
            )
            .await
            .map_err(EngineError::from_remote)?;

        let wrapped_signing_key = self.session.wrap_signing_capability(&signer)?;
        let row = share_row_from_remote(&remote_share, Some(wrapped_signing_key));
        let key_row = self.keys.build_row(
            row.id,
            KeyRotation::INITIAL,
            &rotation_key,
            remote_share.created_at,
        )?;

        // Two-phase within one transaction: the key row references the share
        // row, and the metadata blob needs the key to exist, so a bare row
        // goes first, then the key, then the filled row. A mid-failure rolls
        // the whole vault back; readers never see the intermediate states.
        self.replica.transaction(|r| {
            r.upsert_share(&ShareRow {
                encrypted_metadata: None,
                ..row.clone()
            })?;
            r.insert_share_key(&key_row)?;
            r.upsert_share(&row)?;
            Ok(())
        })?;

        self.keys.invalidate(row.id).await;
        self.publish()?;
        info!(share = %row.id, "vault created");
        Ok(row)
    }

    /// Returns one locally cached share.
    pub fn get_by_id(&self, share_id: ShareId) -> EngineResult<ShareRow> {
        self.replica
            .with(|r| r.get_share(share_id))?
            .ok_or_else(|| EngineError::NotFound(format!("share {share_id}")))
    }

    /// Lists all locally cached shares.
    pub fn list(&self) -> EngineResult<Vec<ShareRow>> {
        Ok(self.replica.with(|r| r.list_shares())?)
    }

    /// A receiver that observes the local share list across refreshes and
    /// mutations.
    pub fn observe_shares(&self) -> watch::Receiver<Vec<ShareRow>> {
        self.watch_tx.subscribe()
    }

    /// Reconciles the local share list against the remote's: upserts every
    /// remote share and drops local shares (with their items and keys) the
    /// remote no longer grants.
    pub async fn refresh_shares(&self) -> EngineResult<()> {
        let remote_shares = self
            .remote
            .fetch_shares(self.session.user_id)
            .await
            .map_err(EngineError::from_remote)?;

        let local = self.replica.with(|r| r.list_shares())?;
        let departed: Vec<ShareId> = local
            .iter()
            .map(|s| s.id)
            .filter(|id| !remote_shares.iter().any(|r| r.id == *id))
            .collect();

        self.replica.transaction(|r| {
            for share in &remote_shares {
                r.upsert_share(&share_row_from_remote(share, None))?;
            }
            for id in &departed {
                r.delete_share(*id)?;
                r.clear_cursor(&SyncScope::Share(self.session.user_id, *id).storage_key())?;
            }
            Ok(())
        })?;

        for id in departed {
            self.keys.forget(id).await;
        }
        self.publish()?;
        Ok(())
    }

    /// Decrypts a share's metadata with the key of the rotation it was
    /// encrypted under.
    pub async fn decrypt_metadata(&self, share_id: ShareId) -> EngineResult<ShareMetadata> {
        let share = self.get_by_id(share_id)?;
        let blob = share
            .encrypted_metadata
            .as_deref()
            .ok_or_else(|| EngineError::InvalidState(format!("share {share_id} has no metadata")))?;
        let key = self
            .keys
            .get_key_for_rotation(share_id, share.metadata_rotation)
            .await?;
        decrypt_metadata(&key.key, blob).map_err(|e| EngineError::Integrity {
            share: share_id,
            item: None,
            rotation: Some(share.metadata_rotation),
            detail: format!("metadata decryption failed: {e}"),
        })
    }

    /// Re-encrypts and uploads new metadata under the latest rotation.
    pub async fn update_metadata(
        &self,
        share_id: ShareId,
        metadata: &ShareMetadata,
    ) -> EngineResult<ShareRow> {
        let key = self.keys.get_latest_key(share_id).await?;
        let encrypted = encrypt_metadata(&key.key, metadata)?;

        let remote_share = self
            .remote
            .update_share_metadata(share_id, encrypted, key.rotation)
            .await
            .map_err(EngineError::from_remote)?;

        let row = share_row_from_remote(&remote_share, None);
        self.replica.with(|r| r.upsert_share(&row))?;
        self.publish()?;
        self.get_by_id(share_id)
    }

    /// Leaves (or, for the owner, deletes) a share. Remote-first; local
    /// state including items, keys and the share's sync cursor goes only
    /// after the remote confirms.
    pub async fn leave_share(&self, share_id: ShareId) -> EngineResult<()> {
        self.remote
            .leave_share(share_id)
            .await
            .map_err(EngineError::from_remote)?;

        self.replica.transaction(|r| {
            r.delete_share(share_id)?;
            r.clear_cursor(&SyncScope::Share(self.session.user_id, share_id).storage_key())?;
            Ok(())
        })?;
        self.keys.forget(share_id).await;
        self.publish()?;
        info!(share = %share_id, "left share");
        Ok(())
    }

    /// Installs the next rotation of the share's key ladder and re-encrypts
    /// the metadata under it. Existing items keep their rotation; new writes
    /// pick up the new key.
    pub async fn rotate_key(&self, share_id: ShareId) -> EngineResult<KeyRotation> {
        let share = self.get_by_id(share_id)?;
        if !matches!(share.role, ShareRole::Owner | ShareRole::Admin) {
            return Err(EngineError::InvalidState(format!(
                "role {} cannot rotate share {share_id}",
                share.role.as_str()
            )));
        }

        let metadata = self.decrypt_metadata(share_id).await?;
        let new_key = SecretKey::generate();
        let sealed = self.session.seal_to_self(&new_key)?;

        let installed = self
            .remote
            .rotate_share_key(share_id, sealed)
            .await
            .map_err(EngineError::from_remote)?;
        debug!(share = %share_id, rotation = %installed.rotation, "key rotated");

        let encrypted = encrypt_metadata(&new_key, &metadata)?;
        let remote_share = self
            .remote
            .update_share_metadata(share_id, encrypted, installed.rotation)
            .await
            .map_err(EngineError::from_remote)?;

        let key_row =
            self.keys
                .build_row(share_id, installed.rotation, &new_key, installed.created_at)?;
        let row = share_row_from_remote(&remote_share, None);
        self.replica.transaction(|r| {
            r.insert_share_key(&key_row)?;
            r.upsert_share(&row)?;
            Ok(())
        })?;

        self.keys.invalidate(share_id).await;
        self.publish()?;
        Ok(installed.rotation)
    }

    /// Pushes the current share list to observers.
    pub(crate) fn publish(&self) -> EngineResult<()> {
        let shares = self.replica.with(|r| r.list_shares())?;
        // send_replace never fails even with no receivers.
        self.watch_tx.send_replace(shares);
        Ok(())
    }
}

/// Converts a remote share into its local row form. The wrapped signing key
/// is preserved by the storage layer's upsert when `None` is passed here.
pub(crate) fn share_row_from_remote(
    share: &RemoteShare,
    wrapped_signing_key: Option<String>,
) -> ShareRow {
    ShareRow {
        id: share.id,
        owner_address: share.owner_address,
        latest_rotation: share.latest_rotation,
        encrypted_metadata: Some(share.encrypted_metadata.clone()),
        metadata_rotation: share.metadata_rotation,
        role: share.role,
        owned: share.owned,
        verifying_key: share.verifying_key.clone(),
        wrapped_signing_key,
        created_at: share.created_at,
        updated_at: share.updated_at,
    }
}

fn encrypt_metadata(key: &SecretKey, metadata: &ShareMetadata) -> EngineResult<String> {
    let json = serde_json::to_string(metadata)?;
    encrypt_string(key, &json)
        .map_err(|e| EngineError::InvalidState(format!("metadata encryption failed: {e}")))
}

fn decrypt_metadata(
    key: &SecretKey,
    blob: &str,
) -> Result<ShareMetadata, sealbox_crypto::CryptoError> {
    let json = decrypt_string(key, blob)?;
    Ok(serde_json::from_str(&json)?)
}
