#![allow(dead_code)]

//! Shared test fixtures: an in-memory fake of the remote authority plus
//! session and engine constructors.

use async_trait::async_trait;
use chrono::Utc;
use sealbox_crypto::{AddressKeypair, SecretKey};
use sealbox_engine::{
    BatchFailure, BatchOutcome, CreateShareRequest, Engine, EventPage, InviteRequest,
    InviteTarget, ItemRef, ItemWriteRequest, RemoteApi, RemoteError, RemoteEvent, RemoteInvite,
    RemoteItem, RemoteResult, RemoteShare, RemoteShareKey, SyncConfig, UserSession,
};
use sealbox_storage::Replica;
use sealbox_types::{
    AddressId, EventCursor, InviteToken, ItemId, ItemRevision, ItemState, KeyRotation, ShareId,
    ShareRole, SyncScope, UserId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A fresh session with its own address keypair and local at-rest key.
pub fn test_session() -> UserSession {
    UserSession::new(
        UserId::new(),
        AddressId::new(),
        AddressKeypair::generate(),
        SecretKey::generate(),
    )
}

/// Retry policy that keeps tests fast.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        max_retries: 3,
        backoff_base: std::time::Duration::from_millis(1),
    }
}

/// An engine over a fresh in-memory replica, plus the replica itself for
/// direct assertions.
pub fn engine_with_replica(
    remote: Arc<FakeRemote>,
    session: UserSession,
) -> (Engine, Arc<Replica>) {
    let replica = Arc::new(Replica::open_in_memory().expect("in-memory replica"));
    let engine = Engine::with_config(replica.clone(), remote, session, fast_config());
    (engine, replica)
}

/// Seals a key to a keypair's address, as the remote would deliver it.
pub fn seal_for(keypair: &AddressKeypair, key: &SecretKey) -> sealbox_crypto::SealedKey {
    keypair.public_key().seal_key(key).expect("seal")
}

// ── Fake remote ──────────────────────────────────────────────────

#[derive(Default)]
struct State {
    shares: HashMap<ShareId, RemoteShare>,
    share_keys: HashMap<ShareId, Vec<RemoteShareKey>>,
    items: HashMap<ShareId, BTreeMap<ItemId, RemoteItem>>,
    events: HashMap<String, Vec<RemoteEvent>>,
    invites: HashMap<InviteToken, RemoteInvite>,
    addresses: HashMap<String, Vec<u8>>,
    page_size: usize,
    latency: Option<std::time::Duration>,
    fetch_events_errors: VecDeque<RemoteError>,
    expire_cursors: usize,
    update_item_error: Option<RemoteError>,
    batch_error: Option<RemoteError>,
    create_share_error: Option<RemoteError>,
    full_refresh_shares_next: Vec<ShareId>,
    full_refresh_required_next: bool,
    key_fetches: usize,
}

/// In-memory stand-in for the remote authority, with failure injection.
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                page_size: 50,
                ..State::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake remote poisoned")
    }

    // Seeding

    pub fn add_share(&self, share: RemoteShare) {
        self.lock().shares.insert(share.id, share);
    }

    pub fn add_share_key(&self, share: ShareId, key: RemoteShareKey) {
        self.lock().share_keys.entry(share).or_default().push(key);
    }

    pub fn add_item(&self, item: RemoteItem) {
        self.lock()
            .items
            .entry(item.share_id)
            .or_default()
            .insert(item.id, item);
    }

    pub fn push_event(&self, scope: SyncScope, event: RemoteEvent) {
        self.lock()
            .events
            .entry(scope.storage_key())
            .or_default()
            .push(event);
    }

    pub fn register_address(&self, email: &str, public_key: Vec<u8>) {
        self.lock().addresses.insert(email.to_string(), public_key);
    }

    // Knobs

    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size;
    }

    /// Delays every key and event fetch, widening race windows.
    pub fn set_latency(&self, delay: std::time::Duration) {
        self.lock().latency = Some(delay);
    }

    pub fn queue_fetch_events_error(&self, err: RemoteError) {
        self.lock().fetch_events_errors.push_back(err);
    }

    /// Rejects the next `fetch_events` call carrying a cursor. Stackable.
    pub fn expire_cursor_once(&self) {
        self.lock().expire_cursors += 1;
    }

    pub fn fail_next_update_item(&self, err: RemoteError) {
        self.lock().update_item_error = Some(err);
    }

    pub fn fail_next_batch(&self, err: RemoteError) {
        self.lock().batch_error = Some(err);
    }

    pub fn fail_next_create_share(&self, err: RemoteError) {
        self.lock().create_share_error = Some(err);
    }

    pub fn flag_share_refresh(&self, share: ShareId) {
        self.lock().full_refresh_shares_next.push(share);
    }

    pub fn require_full_refresh(&self) {
        self.lock().full_refresh_required_next = true;
    }

    // Inspection

    pub fn share(&self, id: ShareId) -> Option<RemoteShare> {
        self.lock().shares.get(&id).cloned()
    }

    pub fn items_in(&self, share: ShareId) -> Vec<RemoteItem> {
        self.lock()
            .items
            .get(&share)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn invite(&self, token: InviteToken) -> Option<RemoteInvite> {
        self.lock().invites.get(&token).cloned()
    }

    pub fn remove_share(&self, id: ShareId) {
        let mut state = self.lock();
        state.shares.remove(&id);
        state.share_keys.remove(&id);
        state.items.remove(&id);
    }

    pub fn key_fetch_count(&self) -> usize {
        self.lock().key_fetches
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_shares(&self, _user: UserId) -> RemoteResult<Vec<RemoteShare>> {
        Ok(self.lock().shares.values().cloned().collect())
    }

    async fn fetch_share_keys(&self, share: ShareId) -> RemoteResult<Vec<RemoteShareKey>> {
        self.apply_latency().await;
        let mut state = self.lock();
        state.key_fetches += 1;
        Ok(state.share_keys.get(&share).cloned().unwrap_or_default())
    }

    async fn create_share(
        &self,
        _user: UserId,
        request: CreateShareRequest,
    ) -> RemoteResult<RemoteShare> {
        let mut state = self.lock();
        if let Some(err) = state.create_share_error.take() {
            return Err(err);
        }
        let now = Utc::now();
        let share = RemoteShare {
            id: ShareId::new(),
            owner_address: AddressId::new(),
            latest_rotation: KeyRotation::INITIAL,
            encrypted_metadata: request.encrypted_metadata,
            metadata_rotation: request.metadata_rotation,
            role: ShareRole::Owner,
            owned: true,
            verifying_key: request.verifying_key,
            created_at: now,
            updated_at: now,
        };
        state.share_keys.entry(share.id).or_default().push(RemoteShareKey {
            rotation: KeyRotation::INITIAL,
            sealed_key: request.sealed_rotation_key,
            created_at: now,
        });
        state.shares.insert(share.id, share.clone());
        Ok(share)
    }

    async fn update_share_metadata(
        &self,
        share: ShareId,
        encrypted_metadata: String,
        metadata_rotation: KeyRotation,
    ) -> RemoteResult<RemoteShare> {
        let mut state = self.lock();
        let entry = state
            .shares
            .get_mut(&share)
            .ok_or_else(|| RemoteError::NotFound(format!("share {share}")))?;
        entry.encrypted_metadata = encrypted_metadata;
        entry.metadata_rotation = metadata_rotation;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn rotate_share_key(
        &self,
        share: ShareId,
        sealed_key: sealbox_crypto::SealedKey,
    ) -> RemoteResult<RemoteShareKey> {
        let mut state = self.lock();
        let entry = state
            .shares
            .get_mut(&share)
            .ok_or_else(|| RemoteError::NotFound(format!("share {share}")))?;
        let rotation = entry.latest_rotation.next();
        entry.latest_rotation = rotation;
        entry.updated_at = Utc::now();
        let key = RemoteShareKey {
            rotation,
            sealed_key,
            created_at: Utc::now(),
        };
        state.share_keys.entry(share).or_default().push(key.clone());
        Ok(key)
    }

    async fn leave_share(&self, share: ShareId) -> RemoteResult<()> {
        let mut state = self.lock();
        state
            .shares
            .remove(&share)
            .ok_or_else(|| RemoteError::NotFound(format!("share {share}")))?;
        state.share_keys.remove(&share);
        state.items.remove(&share);
        Ok(())
    }

    async fn fetch_items(&self, share: ShareId) -> RemoteResult<Vec<RemoteItem>> {
        Ok(self
            .lock()
            .items
            .get(&share)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_item(
        &self,
        share: ShareId,
        request: ItemWriteRequest,
    ) -> RemoteResult<RemoteItem> {
        let mut state = self.lock();
        if !state.shares.contains_key(&share) {
            return Err(RemoteError::NotFound(format!("share {share}")));
        }
        let now = Utc::now();
        let item = RemoteItem {
            id: ItemId::new(),
            share_id: share,
            revision: ItemRevision::FIRST,
            content_format_version: request.content_format_version,
            encrypted_content: request.encrypted_content,
            key_packet: request.key_packet,
            state: ItemState::Active,
            rotation: request.rotation,
            created_at: now,
            updated_at: now,
        };
        state.items.entry(share).or_default().insert(item.id, item.clone());
        Ok(item)
    }

    async fn update_item(
        &self,
        share: ShareId,
        item: ItemId,
        base_revision: ItemRevision,
        request: ItemWriteRequest,
    ) -> RemoteResult<RemoteItem> {
        let mut state = self.lock();
        if let Some(err) = state.update_item_error.take() {
            return Err(err);
        }
        let entry = state
            .items
            .get_mut(&share)
            .and_then(|m| m.get_mut(&item))
            .ok_or_else(|| RemoteError::NotFound(format!("item {item}")))?;
        if entry.revision != base_revision {
            return Err(RemoteError::Conflict);
        }
        entry.revision = entry.revision.next();
        entry.content_format_version = request.content_format_version;
        entry.encrypted_content = request.encrypted_content;
        entry.key_packet = request.key_packet;
        entry.rotation = request.rotation;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn trash_items(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
    ) -> RemoteResult<BatchOutcome> {
        self.flip_states(share, batch, Some(ItemState::Trashed))
    }

    async fn restore_items(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
    ) -> RemoteResult<BatchOutcome> {
        self.flip_states(share, batch, Some(ItemState::Active))
    }

    async fn delete_items(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
    ) -> RemoteResult<BatchOutcome> {
        self.flip_states(share, batch, None)
    }

    async fn fetch_events(
        &self,
        scope: SyncScope,
        cursor: Option<EventCursor>,
    ) -> RemoteResult<EventPage> {
        self.apply_latency().await;
        let mut state = self.lock();
        if let Some(err) = state.fetch_events_errors.pop_front() {
            return Err(err);
        }
        let page_size = state.page_size;
        let log_len = state
            .events
            .get(&scope.storage_key())
            .map_or(0, Vec::len);

        let Some(cursor) = cursor else {
            // Head anchor: current position, no events.
            return Ok(EventPage {
                events: Vec::new(),
                cursor_next: EventCursor::new(log_len.to_string()),
                events_pending: false,
                full_refresh_shares: Vec::new(),
                full_refresh_required: false,
            });
        };

        if state.expire_cursors > 0 {
            state.expire_cursors -= 1;
            return Err(RemoteError::UnknownCursor);
        }
        let idx: usize = cursor
            .as_str()
            .parse()
            .map_err(|_| RemoteError::Protocol("bad cursor".to_string()))?;
        if idx > log_len {
            return Err(RemoteError::UnknownCursor);
        }

        let end = (idx + page_size).min(log_len);
        let events = state
            .events
            .get(&scope.storage_key())
            .map(|log| log[idx..end].to_vec())
            .unwrap_or_default();
        Ok(EventPage {
            events,
            cursor_next: EventCursor::new(end.to_string()),
            events_pending: end < log_len,
            full_refresh_shares: std::mem::take(&mut state.full_refresh_shares_next),
            full_refresh_required: std::mem::take(&mut state.full_refresh_required_next),
        })
    }

    async fn send_invite(&self, request: InviteRequest) -> RemoteResult<RemoteInvite> {
        let mut state = self.lock();
        let (email, keys, assertion) = match request.target {
            InviteTarget::ExistingUser { email, keys } => (email, keys, None),
            InviteTarget::NewUser { email, assertion } => (email, Vec::new(), Some(assertion)),
        };
        let invite = RemoteInvite {
            token: InviteToken::new(),
            share_id: request.share_id,
            inviter_address: AddressId::new(),
            invited_email: email,
            encrypted_metadata: request.encrypted_metadata,
            item_count_hint: request.item_count_hint,
            keys,
            new_user_assertion: assertion,
            created_at: Utc::now(),
        };
        state.invites.insert(invite.token, invite.clone());
        Ok(invite)
    }

    async fn confirm_invite(
        &self,
        token: InviteToken,
        keys: Vec<(KeyRotation, sealbox_crypto::SealedKey)>,
    ) -> RemoteResult<()> {
        let mut state = self.lock();
        let invite = state
            .invites
            .get_mut(&token)
            .ok_or_else(|| RemoteError::NotFound(format!("invite {token}")))?;
        invite.keys = keys;
        Ok(())
    }

    async fn accept_invite(&self, token: InviteToken) -> RemoteResult<RemoteShare> {
        let mut state = self.lock();
        let invite = state
            .invites
            .remove(&token)
            .ok_or_else(|| RemoteError::NotFound(format!("invite {token}")))?;
        let mut share = state
            .shares
            .get(&invite.share_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("share {}", invite.share_id)))?;
        share.role = ShareRole::Write;
        share.owned = false;
        Ok(share)
    }

    async fn reject_invite(&self, token: InviteToken) -> RemoteResult<()> {
        self.lock()
            .invites
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("invite {token}")))
    }

    async fn cancel_invite(&self, token: InviteToken) -> RemoteResult<()> {
        self.lock()
            .invites
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("invite {token}")))
    }

    async fn send_invite_reminder(&self, token: InviteToken) -> RemoteResult<()> {
        if self.lock().invites.contains_key(&token) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("invite {token}")))
        }
    }

    async fn fetch_pending_invites(&self, _user: UserId) -> RemoteResult<Vec<RemoteInvite>> {
        Ok(self.lock().invites.values().cloned().collect())
    }

    async fn resolve_address_keys(&self, email: &str) -> RemoteResult<Vec<u8>> {
        self.lock()
            .addresses
            .get(email)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("address for {email}")))
    }
}

impl FakeRemote {
    /// The guard lock must not be held across this await.
    async fn apply_latency(&self) {
        let latency = self.lock().latency;
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    /// Shared body of the three batched state operations. `target: None`
    /// means permanent deletion.
    fn flip_states(
        &self,
        share: ShareId,
        batch: Vec<ItemRef>,
        target: Option<ItemState>,
    ) -> RemoteResult<BatchOutcome> {
        let mut state = self.lock();
        if let Some(err) = state.batch_error.take() {
            return Err(err);
        }
        let mut outcome = BatchOutcome::default();
        let items = state.items.entry(share).or_default();
        for item_ref in batch {
            let Some(entry) = items.get_mut(&item_ref.id) else {
                outcome.failed.push(BatchFailure {
                    id: item_ref.id,
                    reason: "unknown item".to_string(),
                });
                continue;
            };
            if entry.revision != item_ref.revision {
                outcome.failed.push(BatchFailure {
                    id: item_ref.id,
                    reason: "stale revision".to_string(),
                });
                continue;
            }
            match target {
                Some(new_state) => {
                    entry.state = new_state;
                    entry.revision = entry.revision.next();
                    entry.updated_at = Utc::now();
                    outcome.succeeded.push(ItemRef {
                        id: item_ref.id,
                        revision: entry.revision,
                    });
                }
                None => {
                    items.remove(&item_ref.id);
                    outcome.succeeded.push(item_ref);
                }
            }
        }
        Ok(outcome)
    }
}
