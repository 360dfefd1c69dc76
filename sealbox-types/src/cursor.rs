//! Event cursor: an opaque marker into the remote change log.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque pointer to the last applied position in the remote event log.
///
/// The engine never interprets the contents; it only stores the cursor
/// after a page is fully applied and hands it back on the next fetch.
/// A cursor the remote no longer recognizes forces a full refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCursor(String);

impl EventCursor {
    /// Wraps a remote-supplied cursor value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the opaque cursor value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scope a sync pass (and its cursor) covers: the whole account, or a
/// single share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncScope {
    /// All shares visible to the user.
    User(crate::UserId),
    /// One share.
    Share(crate::UserId, crate::ShareId),
}

impl SyncScope {
    /// Returns the user this scope belongs to.
    #[must_use]
    pub fn user(&self) -> crate::UserId {
        match self {
            Self::User(user) => *user,
            Self::Share(user, _) => *user,
        }
    }

    /// Returns the share, if this is a share-level scope.
    #[must_use]
    pub fn share(&self) -> Option<crate::ShareId> {
        match self {
            Self::User(_) => None,
            Self::Share(_, share) => Some(*share),
        }
    }

    /// Stable storage key for this scope.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::User(user) => format!("user:{user}"),
            Self::Share(user, share) => format!("share:{user}:{share}"),
        }
    }
}
