//! Per-share rotating key ladder.
//!
//! Resolves (share, rotation) to a usable key. Keys arrive from the remote
//! sealed to the caller's address key; they are unwrapped transiently inside
//! the crypto boundary, immediately re-wrapped under the local at-rest
//! secret, and persisted in BOTH forms — the received form is what gets
//! forwarded to future invitees without another round trip.

use crate::error::{EngineError, EngineResult};
use crate::remote::{RemoteApi, RemoteShareKey};
use crate::session::UserSession;
use chrono::{DateTime, Utc};
use sealbox_crypto::{SealedKey, SecretKey};
use sealbox_storage::{Replica, ShareKeyRow};
use sealbox_types::{KeyRotation, ShareId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// One usable rotation of a share's ladder.
#[derive(Clone)]
pub struct ShareKey {
    pub share_id: ShareId,
    pub rotation: KeyRotation,
    pub key: SecretKey,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ShareKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareKey")
            .field("share_id", &self.share_id)
            .field("rotation", &self.rotation)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The per-share key cache and its remote reconciliation.
///
/// Reads are multi-reader; a forced refresh is single-flight per share, so
/// concurrent callers share one remote round trip.
pub struct ShareKeyStore {
    replica: Arc<Replica>,
    remote: Arc<dyn RemoteApi>,
    session: Arc<UserSession>,
    /// Unwrapped ladder per share. Owned by this store; populated from the
    /// replica and extended only through ingestion or refresh.
    cache: RwLock<HashMap<ShareId, BTreeMap<KeyRotation, ShareKey>>>,
    /// Per-share refresh guards (single-flight).
    refresh_locks: Mutex<HashMap<ShareId, Arc<Mutex<()>>>>,
}

impl ShareKeyStore {
    pub fn new(replica: Arc<Replica>, remote: Arc<dyn RemoteApi>, session: Arc<UserSession>) -> Self {
        Self {
            replica,
            remote,
            session,
            cache: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the full ladder for a share, ascending by rotation.
    ///
    /// Without `force_refresh`, a non-empty local cache (memory, then
    /// replica) is returned as-is; the remote is consulted only when
    /// nothing is known locally.
    pub async fn get_keys(
        &self,
        share: ShareId,
        force_refresh: bool,
    ) -> EngineResult<Vec<ShareKey>> {
        if !force_refresh {
            if let Some(keys) = self.cached(share).await {
                return Ok(keys);
            }
            let local = self.load_from_replica(share)?;
            if !local.is_empty() {
                self.put_cache(share, &local).await;
                return Ok(local);
            }
        }

        self.refresh(share).await?;
        Ok(self.cached(share).await.unwrap_or_default())
    }

    /// The key of the highest rotation known for this share.
    pub async fn get_latest_key(&self, share: ShareId) -> EngineResult<ShareKey> {
        let keys = self.get_keys(share, false).await?;
        keys.into_iter()
            .max_by_key(|k| k.rotation)
            .ok_or_else(|| EngineError::NotFound(format!("no keys for share {share}")))
    }

    /// The key of one specific rotation. Refreshes once if the rotation is
    /// not known locally; a rotation the remote does not have either is
    /// `NotFound` — never substituted by a different generation.
    pub async fn get_key_for_rotation(
        &self,
        share: ShareId,
        rotation: KeyRotation,
    ) -> EngineResult<ShareKey> {
        if let Some(key) = self.lookup(share, rotation).await? {
            return Ok(key);
        }

        debug!(%share, %rotation, "rotation not cached, refreshing ladder");
        self.refresh(share).await?;

        self.lookup(share, rotation)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("share {share} rotation {rotation}")))
    }

    /// Ingests sealed keys (from a remote fetch or an accepted invite):
    /// unwrap inside the crypto boundary, re-wrap under the local at-rest
    /// secret, persist both forms. Existing rotations are never overwritten.
    pub async fn ingest_sealed_keys(
        &self,
        share: ShareId,
        keys: &[(KeyRotation, SealedKey, DateTime<Utc>)],
    ) -> EngineResult<()> {
        let mut rows = Vec::with_capacity(keys.len());
        for (rotation, sealed, created_at) in keys {
            let raw = self
                .session
                .address_keys()
                .open_sealed_key(sealed)
                .map_err(|_| EngineError::InvalidKeyMaterial {
                    share,
                    rotation: *rotation,
                })?;
            let local_form = self.session.wrap_for_storage(&raw)?;
            rows.push(ShareKeyRow {
                share_id: share,
                rotation: *rotation,
                received_form: sealed.to_base64(),
                local_form,
                created_at: *created_at,
            });
        }

        self.replica.transaction(|r| {
            for row in &rows {
                r.insert_share_key(row)?;
            }
            Ok(())
        })?;

        self.reload_cache(share).await?;
        Ok(())
    }

    /// Builds the storable row for a locally generated key (vault creation,
    /// key rotation). The caller inserts it inside its own transaction and
    /// then calls [`Self::invalidate`].
    pub fn build_row(
        &self,
        share: ShareId,
        rotation: KeyRotation,
        key: &SecretKey,
        created_at: DateTime<Utc>,
    ) -> EngineResult<ShareKeyRow> {
        Ok(ShareKeyRow {
            share_id: share,
            rotation,
            received_form: self.session.seal_to_self(key)?.to_base64(),
            local_form: self.session.wrap_for_storage(key)?,
            created_at,
        })
    }

    /// The received (sealed) forms of every known rotation, the material
    /// forwarded when re-wrapping for an invitee.
    pub fn received_forms(&self, share: ShareId) -> EngineResult<Vec<(KeyRotation, SealedKey)>> {
        let rows = self.replica.with(|r| r.get_share_keys(share))?;
        rows.iter()
            .map(|row| {
                let sealed = SealedKey::from_base64(&row.received_form).map_err(|_| {
                    EngineError::InvalidKeyMaterial {
                        share,
                        rotation: row.rotation,
                    }
                })?;
                Ok((row.rotation, sealed))
            })
            .collect()
    }

    /// Drops the in-memory ladder for a share; the next read reloads from
    /// the replica.
    pub async fn invalidate(&self, share: ShareId) {
        self.cache.write().await.remove(&share);
    }

    /// Drops a departed share's ladder entirely (rows go with the share).
    pub async fn forget(&self, share: ShareId) {
        self.cache.write().await.remove(&share);
    }

    // ── Internals ────────────────────────────────────────────────

    async fn cached(&self, share: ShareId) -> Option<Vec<ShareKey>> {
        let cache = self.cache.read().await;
        cache
            .get(&share)
            .filter(|ladder| !ladder.is_empty())
            .map(|ladder| ladder.values().cloned().collect())
    }

    async fn put_cache(&self, share: ShareId, keys: &[ShareKey]) {
        let mut cache = self.cache.write().await;
        let ladder = cache.entry(share).or_default();
        for key in keys {
            ladder.entry(key.rotation).or_insert_with(|| key.clone());
        }
    }

    async fn lookup(&self, share: ShareId, rotation: KeyRotation) -> EngineResult<Option<ShareKey>> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.get(&share).and_then(|l| l.get(&rotation)) {
                return Ok(Some(key.clone()));
            }
        }
        let local = self.load_from_replica(share)?;
        if !local.is_empty() {
            self.put_cache(share, &local).await;
        }
        Ok(local.into_iter().find(|k| k.rotation == rotation))
    }

    /// Fetches the remote ladder and reconciles it into local storage.
    /// Single-flight per share: a second caller waits for the first
    /// refresh instead of issuing another fetch.
    async fn refresh(&self, share: ShareId) -> EngineResult<()> {
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks.entry(share).or_default().clone()
        };

        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Another refresh is in flight; wait for it and reuse its work.
                let _g = lock.lock().await;
                return Ok(());
            }
        };

        let remote_keys: Vec<RemoteShareKey> = self
            .remote
            .fetch_share_keys(share)
            .await
            .map_err(EngineError::from_remote)?;

        debug!(%share, count = remote_keys.len(), "fetched share keys");

        let pairs: Vec<(KeyRotation, SealedKey, DateTime<Utc>)> = remote_keys
            .into_iter()
            .map(|k| (k.rotation, k.sealed_key, k.created_at))
            .collect();

        // Ingestion inserts with OR IGNORE, so a remote answer that lags
        // behind what we already persisted never regresses the ladder.
        self.ingest_sealed_keys(share, &pairs).await
    }

    fn load_from_replica(&self, share: ShareId) -> EngineResult<Vec<ShareKey>> {
        let rows = self.replica.with(|r| r.get_share_keys(share))?;
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match self.session.unwrap_from_storage(&row.local_form) {
                Ok(key) => key,
                Err(e) => {
                    warn!(%share, rotation = %row.rotation, "stored share key failed to unwrap: {e}");
                    return Err(EngineError::InvalidKeyMaterial {
                        share,
                        rotation: row.rotation,
                    });
                }
            };
            keys.push(ShareKey {
                share_id: share,
                rotation: row.rotation,
                key,
                created_at: row.created_at,
            });
        }
        Ok(keys)
    }

    async fn reload_cache(&self, share: ShareId) -> EngineResult<()> {
        let local = self.load_from_replica(share)?;
        let mut cache = self.cache.write().await;
        let ladder = cache.entry(share).or_default();
        for key in local {
            ladder.entry(key.rotation).or_insert(key);
        }
        Ok(())
    }
}
