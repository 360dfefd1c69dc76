//! Monotonic counters: key rotations and item revisions.
//!
//! Both only ever move forward. Rotations are assigned per share by the
//! remote authority; revisions are assigned per item on every accepted
//! write and drive optimistic concurrency.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation number of a share's symmetric key.
///
/// Rotation 0 is the key a vault is created with; every rotation after
/// that re-keys the share without re-encrypting existing items (they keep
/// the rotation they were written under).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct KeyRotation(u32);

impl KeyRotation {
    /// The rotation a freshly created vault starts at.
    pub const INITIAL: Self = Self(0);

    /// Creates a rotation from a raw generation number.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw generation number.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns the next rotation in the ladder.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for KeyRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned monotonic version counter for one item.
///
/// Every accepted mutation returns a strictly greater revision; a write
/// submitted with a stale base revision is rejected as a conflict.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ItemRevision(u64);

impl ItemRevision {
    /// The revision assigned to a newly created item.
    pub const FIRST: Self = Self(1);

    /// Creates a revision from a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next revision.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ItemRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
