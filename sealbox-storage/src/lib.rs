//! SQLite local replica for the Sealbox client engine.
//!
//! Stores shares, the per-share key ladder, items (content always encrypted
//! at rest), pending invites and per-scope event cursors. All writes go
//! through explicit transactions; the engine scopes one transaction to one
//! logical operation so partial state is never observable.

mod error;
mod replica;
mod rows;

pub use error::{StorageError, StorageResult};
pub use replica::{Replica, ReplicaView};
pub use rows::{CursorRow, InviteKeyRow, ItemRow, PendingInviteRow, ShareKeyRow, ShareRow};
