//! Core type definitions for the Sealbox client engine.
//!
//! Identifier newtypes, monotonic counters (key rotations, item revisions),
//! the opaque event cursor, and the small state enums shared by the storage
//! and engine crates. No I/O lives here.

mod counters;
mod cursor;
mod ids;

pub use counters::{ItemRevision, KeyRotation};
pub use cursor::{EventCursor, SyncScope};
pub use ids::{AddressId, InviteToken, ItemId, ShareId, UserId};

use serde::{Deserialize, Serialize};

/// Lifecycle state of an item.
///
/// Permanent deletion removes the row entirely, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Visible and usable.
    Active,
    /// Sent to trash; recoverable until permanently deleted.
    Trashed,
}

impl ItemState {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trashed => "trashed",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "trashed" => Some(Self::Trashed),
            _ => None,
        }
    }
}

/// Membership role of the local user on a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareRole {
    /// Created the vault; full control.
    Owner,
    /// May manage membership and rotate keys.
    Admin,
    /// May create and edit items.
    Write,
    /// Read-only access.
    Read,
}

impl ShareRole {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Write => "write",
            Self::Read => "read",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "write" => Some(Self::Write),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    /// Whether this role may mutate items in the share.
    #[must_use]
    pub fn can_write(&self) -> bool {
        !matches!(self, Self::Read)
    }
}
