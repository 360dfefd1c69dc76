//! Sealbox client engine: data sync and key management.
//!
//! This crate is the device-side brain of a Sealbox client. It owns the
//! local replica, the per-share rotating key ladders, the event-sourced
//! sync loop against the remote authority, and the invitation flows that
//! re-wrap vault keys for new members. The remote itself is abstracted
//! behind [`RemoteApi`]; a wire client plugs in underneath.
//!
//! The pieces compose as one [`Engine`] per unlocked session:
//!
//! - [`ShareKeyStore`] resolves (share, rotation) to usable keys
//! - [`ItemStore`] creates, updates and decrypts items
//! - [`ShareStore`] manages vaults and publishes a watchable share list
//! - [`EventSyncEngine`] drains the remote change log into the replica
//! - [`InviteEngine`] grants and receives vault access

mod error;
mod events;
mod invites;
mod item_keys;
mod items;
mod remote;
mod session;
mod share_keys;
mod shares;

pub use error::{EngineError, EngineResult, RemoteError, RemoteResult};
pub use events::{EventSyncEngine, SyncConfig, SyncOutcome};
pub use invites::InviteEngine;
pub use item_keys::{ItemKeyDeriver, FORMAT_ITEM_KEY, FORMAT_SHARED_KEY};
pub use items::{BulkReport, ItemContent, ItemStore, MAX_BATCH_SIZE};
pub use remote::{
    BatchFailure, BatchOutcome, CreateShareRequest, EventPage, InviteRequest, InviteTarget,
    ItemRef, ItemWriteRequest, NewUserAssertion, RemoteApi, RemoteEvent, RemoteInvite, RemoteItem,
    RemoteShare, RemoteShareKey,
};
pub use session::UserSession;
pub use share_keys::{ShareKey, ShareKeyStore};
pub use shares::{ShareMetadata, ShareStore};

use sealbox_storage::Replica;
use std::sync::Arc;

/// All engine components wired together for one unlocked session.
pub struct Engine {
    pub keys: Arc<ShareKeyStore>,
    pub items: Arc<ItemStore>,
    pub shares: Arc<ShareStore>,
    pub sync: Arc<EventSyncEngine>,
    pub invites: Arc<InviteEngine>,
}

impl Engine {
    /// Wires up all components over one replica, remote and session.
    pub fn new(replica: Arc<Replica>, remote: Arc<dyn RemoteApi>, session: UserSession) -> Self {
        Self::with_config(replica, remote, session, SyncConfig::default())
    }

    /// Same as [`Engine::new`] with an explicit sync retry policy.
    pub fn with_config(
        replica: Arc<Replica>,
        remote: Arc<dyn RemoteApi>,
        session: UserSession,
        config: SyncConfig,
    ) -> Self {
        let session = Arc::new(session);
        let keys = Arc::new(ShareKeyStore::new(
            replica.clone(),
            remote.clone(),
            session.clone(),
        ));
        let shares = Arc::new(ShareStore::new(
            replica.clone(),
            remote.clone(),
            keys.clone(),
            session.clone(),
        ));
        let items = Arc::new(ItemStore::new(
            replica.clone(),
            remote.clone(),
            keys.clone(),
            session.clone(),
        ));
        let sync = Arc::new(EventSyncEngine::new(
            replica.clone(),
            remote.clone(),
            shares.clone(),
            keys.clone(),
            config,
        ));
        let invites = Arc::new(InviteEngine::new(
            replica,
            remote,
            keys.clone(),
            shares.clone(),
            session,
        ));
        Self {
            keys,
            items,
            shares,
            sync,
            invites,
        }
    }
}
