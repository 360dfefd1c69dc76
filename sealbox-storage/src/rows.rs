//! Typed rows of the local replica.
//!
//! Everything secret is stored in wrapped/encrypted form; the replica never
//! sees raw key material or plaintext content.

use chrono::{DateTime, Utc};
use sealbox_types::{
    AddressId, EventCursor, InviteToken, ItemId, ItemRevision, ItemState, KeyRotation, ShareId,
    ShareRole,
};
use serde::{Deserialize, Serialize};

/// One share (vault) as cached locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRow {
    pub id: ShareId,
    pub owner_address: AddressId,
    /// Highest rotation observed for this share.
    pub latest_rotation: KeyRotation,
    /// Encrypted metadata blob (base64). Empty only mid-transaction during
    /// two-phase vault creation; never visible to readers.
    pub encrypted_metadata: Option<String>,
    /// The rotation the metadata blob is encrypted under.
    pub metadata_rotation: KeyRotation,
    pub role: ShareRole,
    /// Whether the local user created this vault.
    pub owned: bool,
    /// Share verifying key, base64 of the raw 32 bytes.
    pub verifying_key: String,
    /// Share signing secret, wrapped under the local at-rest key (base64).
    /// Present only when the local user holds the signing capability.
    pub wrapped_signing_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One rotation of a share's key ladder.
///
/// Both wrapped forms are kept: `received_form` (sealed to our address key,
/// exactly as the remote delivered it) is needed to forward to future
/// invitees; `local_form` (re-wrapped under the local at-rest secret) is
/// what day-to-day decryption uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareKeyRow {
    pub share_id: ShareId,
    pub rotation: KeyRotation,
    /// Sealed-box bytes as received from the remote, base64.
    pub received_form: String,
    /// Re-wrapped under the local at-rest key, base64.
    pub local_form: String,
    pub created_at: DateTime<Utc>,
}

/// One item as cached locally. Content is encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub id: ItemId,
    pub share_id: ShareId,
    pub revision: ItemRevision,
    pub content_format_version: u16,
    /// Encrypted structured content (base64).
    pub encrypted_content: String,
    /// Signed key packet (JSON), absent for format v1 items that use the
    /// share key directly.
    pub key_packet: Option<String>,
    pub state: ItemState,
    /// The rotation this item's content is encrypted under.
    pub rotation: KeyRotation,
    /// False while a speculative local write awaits remote acceptance.
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pending invitation observed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInviteRow {
    pub token: InviteToken,
    pub share_id: ShareId,
    pub inviter_address: AddressId,
    pub invited_email: String,
    /// Encrypted vault-metadata snapshot (base64), shown to the invitee.
    pub encrypted_metadata: String,
    /// Hint for UI: how many items the vault holds.
    pub item_count_hint: u32,
    pub reminder_count: u32,
    /// Signed assertion (JSON) binding a not-yet-registered target to the
    /// rotation ladder at send time. Absent for existing-user invites.
    pub new_user_assertion: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A (rotation, sealed key) pair attached to a pending invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteKeyRow {
    pub token: InviteToken,
    pub rotation: KeyRotation,
    /// Sealed to the invitee's address key, base64.
    pub sealed_key: String,
}

/// A stored event cursor for one sync scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRow {
    pub scope_key: String,
    pub cursor: EventCursor,
    pub updated_at: DateTime<Utc>,
}
