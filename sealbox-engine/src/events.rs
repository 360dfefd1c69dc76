//! Event-sourced sync.
//!
//! Each scope (the user's own data, or one share) keeps a cursor into the
//! remote change log. A sync pass drains pages from that cursor and applies
//! them to the replica; the cursor only advances once a page is fully
//! applied, so an interrupted pass resumes where it stopped and re-applies
//! at most one page. When the remote disowns the cursor, the scope falls
//! back to a single full refresh and re-anchors at the head.

use crate::error::{EngineError, EngineResult, RemoteError};
use crate::items::item_row_from_remote;
use crate::remote::{EventPage, RemoteApi, RemoteEvent};
use crate::shares::{share_row_from_remote, ShareStore};
use crate::share_keys::ShareKeyStore;
use sealbox_storage::Replica;
use sealbox_types::{EventCursor, ShareId, SyncScope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Retry policy for the cursor fetch inside one pass.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts per fetch, transient failures only.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// What one sync pass did.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Event pages applied in this pass.
    pub pages_applied: usize,
    /// Whether the pass fell back to a full refresh at any point.
    pub full_refresh: bool,
    /// Entities that failed to apply; the cursor advanced past them.
    pub entity_failures: Vec<EngineError>,
    /// True when this call piggybacked on a pass already in flight.
    pub coalesced: bool,
}

/// Drives one scope's replica to match the remote.
pub struct EventSyncEngine {
    replica: Arc<Replica>,
    remote: Arc<dyn RemoteApi>,
    shares: Arc<ShareStore>,
    keys: Arc<ShareKeyStore>,
    config: SyncConfig,
    /// Per-scope pass guards: concurrent callers coalesce onto one pass.
    scope_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventSyncEngine {
    pub fn new(
        replica: Arc<Replica>,
        remote: Arc<dyn RemoteApi>,
        shares: Arc<ShareStore>,
        keys: Arc<ShareKeyStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            replica,
            remote,
            shares,
            keys,
            config,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one sync pass for a scope. A pass already in flight for the
    /// same scope is joined, not duplicated.
    pub async fn sync(&self, scope: SyncScope) -> EngineResult<SyncOutcome> {
        let lock = {
            let mut locks = self.scope_locks.lock().await;
            locks.entry(scope.storage_key()).or_default().clone()
        };

        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Wait for the in-flight pass and report coalescence; the
                // replica already reflects whatever that pass applied.
                let _g = lock.lock().await;
                return Ok(SyncOutcome {
                    coalesced: true,
                    ..SyncOutcome::default()
                });
            }
        };

        self.run_pass(&scope).await
    }

    /// Discards the scope's cursor and syncs, forcing a full refresh.
    pub async fn force_sync(&self, scope: SyncScope) -> EngineResult<SyncOutcome> {
        self.replica
            .with(|r| r.clear_cursor(&scope.storage_key()))?;
        self.sync(scope).await
    }

    // ── Pass internals ───────────────────────────────────────────

    async fn run_pass(&self, scope: &SyncScope) -> EngineResult<SyncOutcome> {
        let scope_key = scope.storage_key();
        let mut outcome = SyncOutcome::default();

        let mut cursor = match self.replica.with(|r| r.get_cursor(&scope_key))? {
            Some(cursor) => cursor,
            None => self.anchor_and_refresh(scope, &mut outcome).await?,
        };
        let mut fell_back = false;

        loop {
            let page = match self.fetch_with_retry(scope, &cursor).await {
                Ok(page) => page,
                Err(RemoteError::UnknownCursor) => {
                    // The remote forgot our position; at most one fallback
                    // per pass, then resume incrementally from the new head.
                    // A remote that disowns the freshly anchored cursor too
                    // is broken, not behind.
                    if fell_back {
                        return Err(EngineError::InvalidState(
                            "remote rejected a freshly anchored cursor".to_string(),
                        ));
                    }
                    fell_back = true;
                    warn!(scope = %scope_key, "cursor expired, falling back to full refresh");
                    self.replica.with(|r| r.clear_cursor(&scope_key))?;
                    cursor = self.anchor_and_refresh(scope, &mut outcome).await?;
                    continue;
                }
                Err(err) => return Err(EngineError::from_remote(err)),
            };

            if page.full_refresh_required {
                info!(scope = %scope_key, "remote demanded a full scope refresh");
                self.full_refresh(scope).await?;
                outcome.full_refresh = true;
            } else {
                for share in &page.full_refresh_shares {
                    self.refresh_share_items(*share).await?;
                    outcome.full_refresh = true;
                }
                self.apply_page(scope, &page, &mut outcome).await?;
                outcome.pages_applied += 1;
            }

            cursor = page.cursor_next.clone();
            self.replica.with(|r| r.set_cursor(&scope_key, &cursor))?;

            if !page.events_pending {
                break;
            }
        }

        debug!(
            scope = %scope_key,
            pages = outcome.pages_applied,
            failures = outcome.entity_failures.len(),
            "sync pass complete"
        );
        Ok(outcome)
    }

    /// For a scope with no cursor: ask the remote for the current head
    /// first, then refresh everything, then persist the head cursor. Any
    /// change racing the refresh is at or after the head and will replay
    /// as an event — replays are idempotent.
    async fn anchor_and_refresh(
        &self,
        scope: &SyncScope,
        outcome: &mut SyncOutcome,
    ) -> EngineResult<EventCursor> {
        let head = self
            .remote
            .fetch_events(*scope, None)
            .await
            .map_err(EngineError::from_remote)?
            .cursor_next;

        self.full_refresh(scope).await?;
        outcome.full_refresh = true;

        self.replica
            .with(|r| r.set_cursor(&scope.storage_key(), &head))?;
        Ok(head)
    }

    async fn fetch_with_retry(
        &self,
        scope: &SyncScope,
        cursor: &EventCursor,
    ) -> Result<EventPage, RemoteError> {
        let mut delay = self.config.backoff_base;
        let mut attempt = 1;
        loop {
            match self
                .remote
                .fetch_events(*scope, Some(cursor.clone()))
                .await
            {
                Ok(page) => return Ok(page),
                Err(RemoteError::Transient(msg)) if attempt < self.config.max_retries => {
                    debug!(attempt, "transient fetch failure, backing off: {msg}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies one page in a single transaction. Per-entity failures are
    /// collected and skipped; the page still counts as applied so the
    /// cursor can advance past the bad entity.
    async fn apply_page(
        &self,
        scope: &SyncScope,
        page: &EventPage,
        outcome: &mut SyncOutcome,
    ) -> EngineResult<()> {
        let mut failures = Vec::new();
        let mut departed_shares: Vec<ShareId> = Vec::new();
        let mut shares_changed = false;
        let user = scope.user();

        self.replica.transaction(|r| {
            for event in &page.events {
                match event {
                    RemoteEvent::ShareDeleted { share_id } => {
                        r.delete_share(*share_id)?;
                        r.clear_cursor(&SyncScope::Share(user, *share_id).storage_key())?;
                        departed_shares.push(*share_id);
                        shares_changed = true;
                    }
                    RemoteEvent::ShareUpdated { share } => {
                        r.upsert_share(&share_row_from_remote(share, None))?;
                        shares_changed = true;
                    }
                    RemoteEvent::ItemsDeleted { share_id, item_ids } => {
                        for id in item_ids {
                            r.delete_item(*share_id, *id)?;
                        }
                    }
                    RemoteEvent::ItemUpserted { item } => {
                        match item_row_from_remote(item, true) {
                            Ok(row) => r.upsert_item(&row)?,
                            Err(err) => failures.push(err),
                        }
                    }
                }
            }
            Ok(())
        })?;

        for share in departed_shares {
            self.keys.forget(share).await;
        }
        if shares_changed {
            self.shares.publish()?;
        }
        outcome.entity_failures.append(&mut failures);
        Ok(())
    }

    /// Rebuilds the scope's local state from the remote's current answer.
    async fn full_refresh(&self, scope: &SyncScope) -> EngineResult<()> {
        match scope {
            SyncScope::User(_) => {
                self.shares.refresh_shares().await?;
                let shares = self.replica.with(|r| r.list_shares())?;
                for share in shares {
                    self.refresh_share_items(share.id).await?;
                }
            }
            SyncScope::Share(_, share_id) => {
                self.refresh_share_items(*share_id).await?;
            }
        }
        Ok(())
    }

    /// Replaces one share's local items with the remote's current set.
    async fn refresh_share_items(&self, share_id: ShareId) -> EngineResult<()> {
        let items = self
            .remote
            .fetch_items(share_id)
            .await
            .map_err(EngineError::from_remote)?;

        let rows: Vec<_> = items
            .iter()
            .map(|item| item_row_from_remote(item, true))
            .collect::<EngineResult<_>>()?;

        self.replica.transaction(|r| {
            r.delete_items_for_share(share_id)?;
            for row in &rows {
                r.upsert_item(row)?;
            }
            Ok(())
        })?;
        debug!(share = %share_id, count = rows.len(), "share items refreshed");
        Ok(())
    }
}
