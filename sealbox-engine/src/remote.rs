//! The remote RPC boundary.
//!
//! An interface, not bytes: the wire client implements [`RemoteApi`] and
//! returns typed responses and [`RemoteError`]s. The engine drives it and
//! never sees encodings, retries at the transport level, or status codes.

use crate::error::RemoteResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sealbox_crypto::{KeyPacket, SealedKey};
use sealbox_types::{
    AddressId, EventCursor, InviteToken, ItemId, ItemRevision, ItemState, KeyRotation, ShareId,
    ShareRole, SyncScope, UserId,
};
use serde::{Deserialize, Serialize};

/// One rotation of a share's key ladder as the remote delivers it,
/// sealed to the calling address's public key.
#[derive(Debug, Clone)]
pub struct RemoteShareKey {
    pub rotation: KeyRotation,
    pub sealed_key: SealedKey,
    pub created_at: DateTime<Utc>,
}

/// A share as the remote describes it.
#[derive(Debug, Clone)]
pub struct RemoteShare {
    pub id: ShareId,
    pub owner_address: AddressId,
    pub latest_rotation: KeyRotation,
    /// Encrypted metadata blob, base64.
    pub encrypted_metadata: String,
    /// The rotation the metadata blob is encrypted under.
    pub metadata_rotation: KeyRotation,
    pub role: ShareRole,
    pub owned: bool,
    /// Share verifying key, base64 of the raw 32 bytes.
    pub verifying_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item as the remote describes it. Content stays encrypted.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub id: ItemId,
    pub share_id: ShareId,
    pub revision: ItemRevision,
    pub content_format_version: u16,
    /// Encrypted structured content, base64.
    pub encrypted_content: String,
    pub key_packet: Option<KeyPacket>,
    pub state: ItemState,
    pub rotation: KeyRotation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a share remotely.
#[derive(Debug, Clone)]
pub struct CreateShareRequest {
    pub encrypted_metadata: String,
    pub metadata_rotation: KeyRotation,
    /// The rotation-0 key, sealed to the creator's own address key so the
    /// remote can hand it back on other devices.
    pub sealed_rotation_key: SealedKey,
    pub verifying_key: String,
}

/// Payload for creating or updating an item remotely.
#[derive(Debug, Clone)]
pub struct ItemWriteRequest {
    pub content_format_version: u16,
    pub encrypted_content: String,
    pub key_packet: Option<KeyPacket>,
    /// The rotation the content is encrypted under.
    pub rotation: KeyRotation,
}

/// (id, revision) reference for batched operations. Batches are keyed by
/// this pair, which is what makes retries safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub id: ItemId,
    pub revision: ItemRevision,
}

/// Per-entity failure inside an otherwise successful batch.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: ItemId,
    pub reason: String,
}

/// Outcome of one batched remote call. `succeeded` carries the new
/// revision per item; `failed` lists entities the remote rejected.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ItemRef>,
    pub failed: Vec<BatchFailure>,
}

/// One remote change-log entry.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// The user lost access to a share (or it was deleted).
    ShareDeleted { share_id: ShareId },
    /// Share metadata, role or rotation changed.
    ShareUpdated { share: RemoteShare },
    /// Items were permanently removed, grouped by share.
    ItemsDeleted { share_id: ShareId, item_ids: Vec<ItemId> },
    /// An item was created or changed.
    ItemUpserted { item: RemoteItem },
}

/// One page of the remote change log.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<RemoteEvent>,
    /// Cursor to resume from once this page is fully applied.
    pub cursor_next: EventCursor,
    /// More events are already waiting after this page.
    pub events_pending: bool,
    /// Shares whose incremental state is no longer trustworthy; each must
    /// be fully refreshed before the loop continues.
    pub full_refresh_shares: Vec<ShareId>,
    /// The whole scope has diverged; discard incremental state entirely.
    pub full_refresh_required: bool,
}

/// A signed assertion binding a not-yet-registered invitee to the rotation
/// ladder as it stood at send time. Re-validated at confirm time so the
/// target cannot be swapped after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserAssertion {
    pub share_id: ShareId,
    pub email: String,
    pub highest_rotation: KeyRotation,
    /// Raw 64-byte signature over [`Self::signed_bytes`].
    pub signature: Vec<u8>,
}

impl NewUserAssertion {
    /// The byte string the signature covers.
    pub fn signed_bytes(share_id: ShareId, email: &str, highest_rotation: KeyRotation) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(share_id.to_string().as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(email.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&highest_rotation.value().to_be_bytes());
        bytes
    }
}

/// Who an invitation is for.
#[derive(Debug, Clone)]
pub enum InviteTarget {
    /// The invitee already has resolvable address keys; the vault keys are
    /// re-wrapped for them at send time.
    ExistingUser {
        email: String,
        keys: Vec<(KeyRotation, SealedKey)>,
    },
    /// The invitee is not registered yet; the wrap is deferred until
    /// confirmation, bound by a signed assertion.
    NewUser {
        email: String,
        assertion: NewUserAssertion,
    },
}

/// Payload for sending an invitation.
#[derive(Debug, Clone)]
pub struct InviteRequest {
    pub share_id: ShareId,
    pub target: InviteTarget,
    /// Encrypted vault-metadata snapshot shown to the invitee.
    pub encrypted_metadata: String,
    pub item_count_hint: u32,
}

/// A pending invitation as the remote describes it. When the local user is
/// the invitee, `keys` holds the ladder sealed to their address key.
#[derive(Debug, Clone)]
pub struct RemoteInvite {
    pub token: InviteToken,
    pub share_id: ShareId,
    pub inviter_address: AddressId,
    pub invited_email: String,
    pub encrypted_metadata: String,
    pub item_count_hint: u32,
    pub keys: Vec<(KeyRotation, SealedKey)>,
    pub new_user_assertion: Option<NewUserAssertion>,
    pub created_at: DateTime<Utc>,
}

/// The remote authority, as the engine consumes it.
///
/// Contract for `fetch_events`: a `None` cursor returns the current head
/// cursor and no events, so a caller can anchor before a full refresh.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    // ── Shares & keys ────────────────────────────────────────────

    async fn fetch_shares(&self, user: UserId) -> RemoteResult<Vec<RemoteShare>>;

    async fn fetch_share_keys(&self, share: ShareId) -> RemoteResult<Vec<RemoteShareKey>>;

    async fn create_share(
        &self,
        user: UserId,
        request: CreateShareRequest,
    ) -> RemoteResult<RemoteShare>;

    async fn update_share_metadata(
        &self,
        share: ShareId,
        encrypted_metadata: String,
        metadata_rotation: KeyRotation,
    ) -> RemoteResult<RemoteShare>;

    /// Installs the next rotation of a share's key ladder. The sealed key is
    /// wrapped to the caller's own address; the remote re-wraps for other
    /// members from their uploaded forms.
    async fn rotate_share_key(
        &self,
        share: ShareId,
        sealed_key: SealedKey,
    ) -> RemoteResult<RemoteShareKey>;

    async fn leave_share(&self, share: ShareId) -> RemoteResult<()>;

    // ── Items ────────────────────────────────────────────────────

    async fn fetch_items(&self, share: ShareId) -> RemoteResult<Vec<RemoteItem>>;

    async fn create_item(
        &self,
        share: ShareId,
        request: ItemWriteRequest,
    ) -> RemoteResult<RemoteItem>;

    /// Rejects with [`RemoteError::Conflict`] when `base_revision` is stale.
    async fn update_item(
        &self,
        share: ShareId,
        item: ItemId,
        base_revision: ItemRevision,
        request: ItemWriteRequest,
    ) -> RemoteResult<RemoteItem>;

    async fn trash_items(&self, share: ShareId, batch: Vec<ItemRef>)
        -> RemoteResult<BatchOutcome>;

    async fn restore_items(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
    ) -> RemoteResult<BatchOutcome>;

    async fn delete_items(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
    ) -> RemoteResult<BatchOutcome>;

    // ── Events ───────────────────────────────────────────────────

    async fn fetch_events(
        &self,
        scope: SyncScope,
        cursor: Option<EventCursor>,
    ) -> RemoteResult<EventPage>;

    // ── Invites ──────────────────────────────────────────────────

    async fn send_invite(&self, request: InviteRequest) -> RemoteResult<RemoteInvite>;

    /// Completes a deferred new-user invite with the now-possible wrap.
    async fn confirm_invite(
        &self,
        token: InviteToken,
        keys: Vec<(KeyRotation, SealedKey)>,
    ) -> RemoteResult<()>;

    async fn accept_invite(&self, token: InviteToken) -> RemoteResult<RemoteShare>;

    async fn reject_invite(&self, token: InviteToken) -> RemoteResult<()>;

    async fn cancel_invite(&self, token: InviteToken) -> RemoteResult<()>;

    async fn send_invite_reminder(&self, token: InviteToken) -> RemoteResult<()>;

    async fn fetch_pending_invites(&self, user: UserId) -> RemoteResult<Vec<RemoteInvite>>;

    /// Resolves the current public address key for an email, or
    /// [`RemoteError::NotFound`] if the user is unknown.
    async fn resolve_address_keys(&self, email: &str) -> RemoteResult<Vec<u8>>;
}
