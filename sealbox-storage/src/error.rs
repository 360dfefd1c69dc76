//! Error types for the local replica.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the local replica.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be parsed back into its typed form.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Serialization error for structured blobs.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
