//! Error taxonomy for the engine.
//!
//! Per-entity failures (a bad signature on one item, a missing key for one
//! rotation) are fatal for that entity only; bulk operations collect them
//! into a report and keep going. Pass-level failures (the cursor fetch
//! itself) abort the pass with the cursor unmoved.

use sealbox_types::{ItemId, ItemRevision, KeyRotation, ShareId};
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Integrity or signature verification failed for one entity.
    #[error("integrity failure for share {share}{}: {detail}", fmt_item(.item))]
    Integrity {
        share: ShareId,
        item: Option<ItemId>,
        rotation: Option<KeyRotation>,
        detail: String,
    },

    /// Key material received from the remote failed to unwrap or verify.
    /// Never silently fall back to an older rotation.
    #[error("invalid key material for share {share} rotation {rotation}")]
    InvalidKeyMaterial {
        share: ShareId,
        rotation: KeyRotation,
    },

    /// Revision mismatch on write; the caller decides how to resolve.
    #[error("revision conflict on item {item}: submitted base revision {submitted}")]
    Conflict {
        share: ShareId,
        item: ItemId,
        submitted: ItemRevision,
    },

    /// A referenced key, share, item or address is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote rejected the call as rate-limited.
    #[error("rate limited: retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Network/remote failure; safe to retry on the next scheduled pass.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// An invariant does not hold for this entity (e.g. a mandated key
    /// packet is missing).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Local replica failure.
    #[error("storage error: {0}")]
    Storage(#[from] sealbox_storage::StorageError),

    /// Serialization round-trip failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn fmt_item(item: &Option<ItemId>) -> String {
    match item {
        Some(id) => format!(" item {id}"),
        None => String::new(),
    }
}

impl EngineError {
    /// True for errors worth retrying on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// The retry-after hint, if the remote supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Typed errors of the remote boundary. The wire client maps transport and
/// HTTP conditions into these; the engine never sees status codes.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// A write was submitted against a stale revision.
    #[error("conflict: stale revision")]
    Conflict,

    /// The referenced entity does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// The supplied event cursor is unknown or expired; the scope must be
    /// fully refreshed.
    #[error("unknown or expired cursor")]
    UnknownCursor,

    /// Rate limited.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network-level failure; retryable.
    #[error("transient: {0}")]
    Transient(String),

    /// The remote answered with something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

impl EngineError {
    /// Maps a remote error into the engine taxonomy, attaching item context
    /// where the remote cannot know it.
    pub fn from_remote(err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict => Self::InvalidState(
                "remote reported a conflict outside a revisioned write".to_string(),
            ),
            RemoteError::NotFound(what) => Self::NotFound(what),
            RemoteError::UnknownCursor => {
                Self::InvalidState("unknown cursor outside a sync pass".to_string())
            }
            RemoteError::RateLimited { retry_after_secs } => Self::RateLimited {
                retry_after: Duration::from_secs(retry_after_secs),
            },
            RemoteError::Transient(msg) => Self::Transient(msg),
            RemoteError::Protocol(msg) => Self::Transient(format!("protocol error: {msg}")),
        }
    }
}
