//! Item lifecycle: create, update, decrypt, and the bulk state operations.
//!
//! Writes are remote-first for creation (nothing lands locally until the
//! remote assigns a revision) and speculative for updates (the local row is
//! written unconfirmed, then confirmed or rolled back once the remote
//! answers). Revisions only ever come from the remote.

use crate::error::{EngineError, EngineResult, RemoteError};
use crate::item_keys::{ItemKeyDeriver, FORMAT_ITEM_KEY, FORMAT_SHARED_KEY};
use crate::remote::{BatchFailure, ItemRef, ItemWriteRequest, RemoteApi, RemoteItem};
use crate::session::UserSession;
use crate::share_keys::{ShareKey, ShareKeyStore};
use chrono::Utc;
use sealbox_crypto::{decrypt_string, encrypt_string, seal_item_key, KeyPacket, SecretKey};
use sealbox_storage::{ItemRow, Replica, ShareRow};
use sealbox_types::{ItemId, ItemState, ShareId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Most entities a single batched remote call may carry.
pub const MAX_BATCH_SIZE: usize = 100;

/// Decrypted structured content of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContent {
    pub title: String,
    #[serde(default)]
    pub note: String,
    /// Free-form structured payload (fields, attachments metadata, ...).
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ItemContent {
    /// Stable content digest, hex-encoded SHA-256 over the JSON form.
    pub fn digest(&self) -> EngineResult<String> {
        let json = serde_json::to_string(self)?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }
}

/// Result of one bulk operation. Per-entity failures never abort the whole
/// batch; `halted` is set when a pass-level error stopped the remaining
/// chunks.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub succeeded: Vec<ItemId>,
    pub failed: Vec<BatchFailure>,
    pub halted: Option<EngineError>,
}

/// Item operations for one user session.
pub struct ItemStore {
    replica: Arc<Replica>,
    remote: Arc<dyn RemoteApi>,
    keys: Arc<ShareKeyStore>,
    session: Arc<UserSession>,
}

impl ItemStore {
    pub fn new(
        replica: Arc<Replica>,
        remote: Arc<dyn RemoteApi>,
        keys: Arc<ShareKeyStore>,
        session: Arc<UserSession>,
    ) -> Self {
        Self {
            replica,
            remote,
            keys,
            session,
        }
    }

    /// Creates an item in a share. The content is encrypted under a fresh
    /// item key (signed packet) when the local user holds the share's
    /// signing capability, or directly under the latest share key otherwise.
    ///
    /// Remote-first: on any remote failure nothing is persisted locally.
    pub async fn create_item(
        &self,
        share_id: ShareId,
        content: &ItemContent,
    ) -> EngineResult<ItemRow> {
        let share = self.require_writable(share_id)?;
        let share_key = self.keys.get_latest_key(share_id).await?;

        let (encrypted_content, key_packet, format) =
            self.encrypt_content(&share, &share_key, content)?;

        let remote_item = self
            .remote
            .create_item(
                share_id,
                ItemWriteRequest {
                    content_format_version: format,
                    encrypted_content,
                    key_packet,
                    rotation: share_key.rotation,
                },
            )
            .await
            .map_err(EngineError::from_remote)?;

        let row = item_row_from_remote(&remote_item, true)?;
        self.replica.with(|r| r.upsert_item(&row))?;
        debug!(item = %row.id, %share_id, revision = %row.revision, "item created");
        Ok(row)
    }

    /// Updates an item's content, re-encrypting under the latest rotation.
    ///
    /// The new content is written locally first as an unconfirmed row; the
    /// remote write then either confirms it (with the new revision) or rolls
    /// it back. A [`EngineError::Conflict`] restores the last-accepted state
    /// so the caller can re-read, merge and retry.
    pub async fn update_item(
        &self,
        share_id: ShareId,
        item_id: ItemId,
        content: &ItemContent,
    ) -> EngineResult<ItemRow> {
        let share = self.require_writable(share_id)?;
        let previous = self
            .replica
            .with(|r| r.get_item(share_id, item_id))?
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))?;
        let share_key = self.keys.get_latest_key(share_id).await?;

        let (encrypted_content, key_packet, format) =
            self.encrypt_content(&share, &share_key, content)?;

        let now = Utc::now();
        let speculative = ItemRow {
            content_format_version: format,
            encrypted_content: encrypted_content.clone(),
            key_packet: key_packet
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            rotation: share_key.rotation,
            confirmed: false,
            updated_at: now,
            ..previous.clone()
        };
        self.replica.with(|r| r.upsert_item(&speculative))?;

        let result = self
            .remote
            .update_item(
                share_id,
                item_id,
                previous.revision,
                ItemWriteRequest {
                    content_format_version: format,
                    encrypted_content,
                    key_packet,
                    rotation: share_key.rotation,
                },
            )
            .await;

        match result {
            Ok(remote_item) => {
                let row = item_row_from_remote(&remote_item, true)?;
                self.replica.with(|r| r.upsert_item(&row))?;
                Ok(row)
            }
            Err(RemoteError::Conflict) => {
                // Someone else won the revision race; put the last-accepted
                // state back and let the caller merge.
                self.replica.with(|r| r.upsert_item(&previous))?;
                warn!(item = %item_id, %share_id, base = %previous.revision, "update rejected as stale");
                Err(EngineError::Conflict {
                    share: share_id,
                    item: item_id,
                    submitted: previous.revision,
                })
            }
            Err(err) => {
                // Transient failures leave the unconfirmed row in place;
                // the next sync pass reconciles it.
                Err(EngineError::from_remote(err))
            }
        }
    }

    /// Decrypts one locally cached item with the key of the exact rotation
    /// its content was encrypted under.
    pub async fn decrypt_item(
        &self,
        share_id: ShareId,
        item_id: ItemId,
    ) -> EngineResult<ItemContent> {
        let share = self.require_share(share_id)?;
        let row = self
            .replica
            .with(|r| r.get_item(share_id, item_id))?
            .ok_or_else(|| EngineError::NotFound(format!("item {item_id}")))?;

        let share_key = self
            .keys
            .get_key_for_rotation(share_id, row.rotation)
            .await?;

        let packet: Option<KeyPacket> = row
            .key_packet
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let item_key = ItemKeyDeriver::derive(
            &share,
            &share_key,
            item_id,
            row.content_format_version,
            packet.as_ref(),
        )?;

        let json = decrypt_string(&item_key, &row.encrypted_content).map_err(|e| {
            EngineError::Integrity {
                share: share_id,
                item: Some(item_id),
                rotation: Some(row.rotation),
                detail: format!("content decryption failed: {e}"),
            }
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Lists locally cached items, optionally filtered by state.
    pub fn list_items(
        &self,
        share_id: ShareId,
        state: Option<ItemState>,
    ) -> EngineResult<Vec<ItemRow>> {
        Ok(self.replica.with(|r| r.list_items(share_id, state))?)
    }

    /// Moves items to the trash. Remote-first; local state flips only for
    /// items the remote accepted.
    pub async fn trash_items(&self, share_id: ShareId, ids: &[ItemId]) -> EngineResult<BulkReport> {
        let mut report = BulkReport::default();
        for chunk in self.chunk_refs(share_id, ids)? {
            let outcome = match self.remote.trash_items(share_id, chunk).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    report.halted = Some(EngineError::from_remote(err));
                    return Ok(report);
                }
            };
            self.apply_state_flips(share_id, &outcome.succeeded, ItemState::Trashed)?;
            report.succeeded.extend(outcome.succeeded.iter().map(|r| r.id));
            report.failed.extend(outcome.failed);
        }
        Ok(report)
    }

    /// Restores items from the trash. Optimistic: local state flips first so
    /// the UI reacts immediately, then rolls back anything the remote
    /// rejected to the state captured before the flip.
    pub async fn restore_items(
        &self,
        share_id: ShareId,
        ids: &[ItemId],
    ) -> EngineResult<BulkReport> {
        let mut report = BulkReport::default();
        for chunk in self.chunk_refs(share_id, ids)? {
            let chunk_refs: Vec<ItemRef> = chunk.clone();
            let prior = self.capture_states(share_id, &chunk_refs)?;
            self.apply_state_flips(share_id, &chunk_refs, ItemState::Active)?;

            let outcome = match self.remote.restore_items(share_id, chunk).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.revert_state_flips(share_id, &chunk_refs, &prior)?;
                    report.halted = Some(EngineError::from_remote(err));
                    return Ok(report);
                }
            };
            let rejected: Vec<ItemRef> = chunk_refs
                .iter()
                .filter(|r| outcome.failed.iter().any(|f| f.id == r.id))
                .copied()
                .collect();
            self.revert_state_flips(share_id, &rejected, &prior)?;
            // Adopt the remote-assigned revisions for the accepted flips.
            self.apply_state_flips(share_id, &outcome.succeeded, ItemState::Active)?;
            report.succeeded.extend(outcome.succeeded.iter().map(|r| r.id));
            report.failed.extend(outcome.failed);
        }
        Ok(report)
    }

    /// Permanently deletes items. Local rows are removed only after the
    /// remote confirms; a deletion the remote rejected stays visible.
    pub async fn delete_items(
        &self,
        share_id: ShareId,
        ids: &[ItemId],
    ) -> EngineResult<BulkReport> {
        let mut report = BulkReport::default();
        for chunk in self.chunk_refs(share_id, ids)? {
            let outcome = match self.remote.delete_items(share_id, chunk).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    report.halted = Some(EngineError::from_remote(err));
                    return Ok(report);
                }
            };
            self.replica.transaction(|r| {
                for item in &outcome.succeeded {
                    r.delete_item(share_id, item.id)?;
                }
                Ok(())
            })?;
            report.succeeded.extend(outcome.succeeded.iter().map(|r| r.id));
            report.failed.extend(outcome.failed);
        }
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────

    fn require_share(&self, share_id: ShareId) -> EngineResult<ShareRow> {
        self.replica
            .with(|r| r.get_share(share_id))?
            .ok_or_else(|| EngineError::NotFound(format!("share {share_id}")))
    }

    fn require_writable(&self, share_id: ShareId) -> EngineResult<ShareRow> {
        let share = self.require_share(share_id)?;
        if !share.role.can_write() {
            return Err(EngineError::InvalidState(format!(
                "role {} cannot write to share {share_id}",
                share.role.as_str()
            )));
        }
        Ok(share)
    }

    /// Encrypts content under a fresh item key (signed packet) or, without
    /// a signing capability, directly under the share key (format v1).
    fn encrypt_content(
        &self,
        share: &ShareRow,
        share_key: &ShareKey,
        content: &ItemContent,
    ) -> EngineResult<(String, Option<KeyPacket>, u16)> {
        let json = serde_json::to_string(content)?;
        match &share.wrapped_signing_key {
            Some(wrapped) => {
                let signer = self.session.unwrap_signing_capability(wrapped)?;
                let item_key = SecretKey::generate();
                let packet =
                    seal_item_key(&share_key.key, &item_key, &signer).map_err(|e| {
                        EngineError::InvalidState(format!("key packet sealing failed: {e}"))
                    })?;
                let encrypted = encrypt_string(&item_key, &json).map_err(|e| {
                    EngineError::InvalidState(format!("content encryption failed: {e}"))
                })?;
                Ok((encrypted, Some(packet), FORMAT_ITEM_KEY))
            }
            None => {
                let encrypted = encrypt_string(&share_key.key, &json).map_err(|e| {
                    EngineError::InvalidState(format!("content encryption failed: {e}"))
                })?;
                Ok((encrypted, None, FORMAT_SHARED_KEY))
            }
        }
    }

    /// Resolves ids to (id, revision) refs from the replica and splits them
    /// into remote-sized chunks. Unknown ids are skipped.
    fn chunk_refs(&self, share_id: ShareId, ids: &[ItemId]) -> EngineResult<Vec<Vec<ItemRef>>> {
        let mut refs = Vec::with_capacity(ids.len());
        self.replica.with(|r| {
            for id in ids {
                if let Some(row) = r.get_item(share_id, *id)? {
                    refs.push(ItemRef {
                        id: row.id,
                        revision: row.revision,
                    });
                }
            }
            Ok(())
        })?;
        Ok(refs.chunks(MAX_BATCH_SIZE).map(<[ItemRef]>::to_vec).collect())
    }

    /// Snapshots the current state of each referenced item, taken before an
    /// optimistic flip so a rollback can restore exactly what was there.
    fn capture_states(
        &self,
        share_id: ShareId,
        refs: &[ItemRef],
    ) -> EngineResult<HashMap<ItemId, ItemState>> {
        let mut states = HashMap::new();
        self.replica.with(|r| {
            for item in refs {
                if let Some(row) = r.get_item(share_id, item.id)? {
                    states.insert(row.id, row.state);
                }
            }
            Ok(())
        })?;
        Ok(states)
    }

    /// Puts rejected or failed flips back to their captured prior state.
    fn revert_state_flips(
        &self,
        share_id: ShareId,
        refs: &[ItemRef],
        prior: &HashMap<ItemId, ItemState>,
    ) -> EngineResult<()> {
        if refs.is_empty() {
            return Ok(());
        }
        self.replica.transaction(|r| {
            for item in refs {
                if let Some(mut row) = r.get_item(share_id, item.id)? {
                    if let Some(state) = prior.get(&item.id) {
                        row.state = *state;
                    }
                    row.revision = item.revision;
                    row.updated_at = Utc::now();
                    r.upsert_item(&row)?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn apply_state_flips(
        &self,
        share_id: ShareId,
        refs: &[ItemRef],
        state: ItemState,
    ) -> EngineResult<()> {
        if refs.is_empty() {
            return Ok(());
        }
        self.replica.transaction(|r| {
            for item in refs {
                if let Some(mut row) = r.get_item(share_id, item.id)? {
                    row.state = state;
                    // Remote-confirmed flips carry the new revision; local
                    // speculative flips pass the unchanged one.
                    row.revision = item.revision;
                    row.updated_at = Utc::now();
                    r.upsert_item(&row)?;
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// Converts a remote item into its local row form.
pub(crate) fn item_row_from_remote(item: &RemoteItem, confirmed: bool) -> EngineResult<ItemRow> {
    Ok(ItemRow {
        id: item.id,
        share_id: item.share_id,
        revision: item.revision,
        content_format_version: item.content_format_version,
        encrypted_content: item.encrypted_content.clone(),
        key_packet: item
            .key_packet
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        state: item.state,
        rotation: item.rotation,
        confirmed,
        created_at: item.created_at,
        updated_at: item.updated_at,
    })
}
