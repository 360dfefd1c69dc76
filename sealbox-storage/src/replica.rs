//! The local replica: SQLite-backed row storage for shares, keys, items,
//! pending invites and event cursors.
//!
//! Every engine write happens inside one explicit transaction scoped to one
//! logical operation ("apply one event page", "create one vault"), so
//! partial application is never observable to readers.

use crate::error::{StorageError, StorageResult};
use crate::rows::{
    CursorRow, InviteKeyRow, ItemRow, PendingInviteRow, ShareKeyRow, ShareRow,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sealbox_types::{
    AddressId, EventCursor, InviteToken, ItemId, ItemRevision, ItemState, KeyRotation, ShareId,
    ShareRole,
};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// The local replica, shared across engine components.
pub struct Replica {
    conn: Arc<Mutex<Connection>>,
}

impl Replica {
    /// Opens (or creates) a replica at the given path.
    pub fn open(path: &std::path::Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let replica = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        replica.init_schema()?;
        Ok(replica)
    }

    /// Opens an in-memory replica (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let replica = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        replica.init_schema()?;
        Ok(replica)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                owner_address TEXT NOT NULL,
                latest_rotation INTEGER NOT NULL,
                encrypted_metadata TEXT,
                metadata_rotation INTEGER NOT NULL,
                role TEXT NOT NULL,
                owned INTEGER NOT NULL,
                verifying_key TEXT NOT NULL,
                wrapped_signing_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS share_keys (
                share_id TEXT NOT NULL,
                rotation INTEGER NOT NULL,
                received_form TEXT NOT NULL,
                local_form TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(share_id, rotation)
            );

            CREATE TABLE IF NOT EXISTS items (
                id TEXT NOT NULL,
                share_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                content_format_version INTEGER NOT NULL,
                encrypted_content TEXT NOT NULL,
                key_packet TEXT,
                state TEXT NOT NULL,
                rotation INTEGER NOT NULL,
                confirmed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(share_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_items_share_state
                ON items(share_id, state);
            CREATE INDEX IF NOT EXISTS idx_items_share_rotation
                ON items(share_id, rotation);

            CREATE TABLE IF NOT EXISTS pending_invites (
                token TEXT PRIMARY KEY,
                share_id TEXT NOT NULL,
                inviter_address TEXT NOT NULL,
                invited_email TEXT NOT NULL,
                encrypted_metadata TEXT NOT NULL,
                item_count_hint INTEGER NOT NULL,
                reminder_count INTEGER NOT NULL,
                new_user_assertion TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invite_keys (
                token TEXT NOT NULL,
                rotation INTEGER NOT NULL,
                sealed_key TEXT NOT NULL,
                UNIQUE(token, rotation)
            );

            CREATE TABLE IF NOT EXISTS event_cursors (
                scope_key TEXT PRIMARY KEY,
                cursor TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Runs read/autocommit operations against the replica.
    pub fn with<T>(&self, f: impl FnOnce(&ReplicaView<'_>) -> StorageResult<T>) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap();
        f(&ReplicaView::new(&conn))
    }

    /// Runs `f` inside one transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&ReplicaView<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        match f(&ReplicaView::new(&tx)) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                Err(e)
            }
        }
    }
}

/// A view over the replica, valid for one lock hold or one transaction.
pub struct ReplicaView<'a> {
    conn: &'a Connection,
}

impl<'a> ReplicaView<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ── Shares ───────────────────────────────────────────────────

    /// Inserts or replaces a share row.
    pub fn upsert_share(&self, share: &ShareRow) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO shares (id, owner_address, latest_rotation, encrypted_metadata,
                                 metadata_rotation, role, owned, verifying_key,
                                 wrapped_signing_key, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 owner_address = excluded.owner_address,
                 latest_rotation = MAX(latest_rotation, excluded.latest_rotation),
                 encrypted_metadata = excluded.encrypted_metadata,
                 metadata_rotation = excluded.metadata_rotation,
                 role = excluded.role,
                 owned = excluded.owned,
                 verifying_key = excluded.verifying_key,
                 wrapped_signing_key = COALESCE(excluded.wrapped_signing_key, wrapped_signing_key),
                 updated_at = excluded.updated_at",
            params![
                share.id.to_string(),
                share.owner_address.to_string(),
                share.latest_rotation.value(),
                share.encrypted_metadata,
                share.metadata_rotation.value(),
                share.role.as_str(),
                share.owned as i64,
                share.verifying_key,
                share.wrapped_signing_key,
                share.created_at.to_rfc3339(),
                share.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches one share.
    pub fn get_share(&self, id: ShareId) -> StorageResult<Option<ShareRow>> {
        self.conn
            .query_row(
                "SELECT id, owner_address, latest_rotation, encrypted_metadata, metadata_rotation,
                        role, owned, verifying_key, wrapped_signing_key, created_at, updated_at
                 FROM shares WHERE id = ?1",
                params![id.to_string()],
                share_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists all cached shares.
    pub fn list_shares(&self) -> StorageResult<Vec<ShareRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_address, latest_rotation, encrypted_metadata, metadata_rotation,
                    role, owned, verifying_key, wrapped_signing_key, created_at, updated_at
             FROM shares ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], share_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Deletes a share together with its keys and items.
    pub fn delete_share(&self, id: ShareId) -> StorageResult<()> {
        let id = id.to_string();
        self.conn
            .execute("DELETE FROM items WHERE share_id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM share_keys WHERE share_id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM shares WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Share keys ───────────────────────────────────────────────

    /// Inserts one rotation of a share's key ladder.
    ///
    /// A rotation already present is left untouched: rotations are
    /// immutable once created, and a refresh returning a subset must never
    /// regress what is persisted.
    pub fn insert_share_key(&self, key: &ShareKeyRow) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO share_keys (share_id, rotation, received_form, local_form, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.share_id.to_string(),
                key.rotation.value(),
                key.received_form,
                key.local_form,
                key.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All persisted rotations for a share, ascending.
    pub fn get_share_keys(&self, share_id: ShareId) -> StorageResult<Vec<ShareKeyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT share_id, rotation, received_form, local_form, created_at
             FROM share_keys WHERE share_id = ?1 ORDER BY rotation",
        )?;
        let rows = stmt.query_map(params![share_id.to_string()], share_key_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// One specific rotation.
    pub fn get_share_key(
        &self,
        share_id: ShareId,
        rotation: KeyRotation,
    ) -> StorageResult<Option<ShareKeyRow>> {
        self.conn
            .query_row(
                "SELECT share_id, rotation, received_form, local_form, created_at
                 FROM share_keys WHERE share_id = ?1 AND rotation = ?2",
                params![share_id.to_string(), rotation.value()],
                share_key_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    // ── Items ────────────────────────────────────────────────────

    /// Inserts or replaces an item row.
    pub fn upsert_item(&self, item: &ItemRow) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO items
                 (id, share_id, revision, content_format_version, encrypted_content, key_packet,
                  state, rotation, confirmed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id.to_string(),
                item.share_id.to_string(),
                item.revision.value() as i64,
                item.content_format_version,
                item.encrypted_content,
                item.key_packet,
                item.state.as_str(),
                item.rotation.value(),
                item.confirmed as i64,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches one item.
    pub fn get_item(&self, share_id: ShareId, id: ItemId) -> StorageResult<Option<ItemRow>> {
        self.conn
            .query_row(
                "SELECT id, share_id, revision, content_format_version, encrypted_content,
                        key_packet, state, rotation, confirmed, created_at, updated_at
                 FROM items WHERE share_id = ?1 AND id = ?2",
                params![share_id.to_string(), id.to_string()],
                item_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists items in a share, optionally filtered by state.
    pub fn list_items(
        &self,
        share_id: ShareId,
        state: Option<ItemState>,
    ) -> StorageResult<Vec<ItemRow>> {
        match state {
            Some(state) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, share_id, revision, content_format_version, encrypted_content,
                            key_packet, state, rotation, confirmed, created_at, updated_at
                     FROM items WHERE share_id = ?1 AND state = ?2 ORDER BY created_at",
                )?;
                let rows =
                    stmt.query_map(params![share_id.to_string(), state.as_str()], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, share_id, revision, content_format_version, encrypted_content,
                            key_packet, state, rotation, confirmed, created_at, updated_at
                     FROM items WHERE share_id = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map(params![share_id.to_string()], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
            }
        }
    }

    /// Removes one item permanently.
    pub fn delete_item(&self, share_id: ShareId, id: ItemId) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM items WHERE share_id = ?1 AND id = ?2",
            params![share_id.to_string(), id.to_string()],
        )?;
        Ok(())
    }

    /// Removes all items of a share (full-refresh rebuild).
    pub fn delete_items_for_share(&self, share_id: ShareId) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM items WHERE share_id = ?1",
            params![share_id.to_string()],
        )?;
        Ok(())
    }

    // ── Pending invites ──────────────────────────────────────────

    /// Inserts or replaces a pending invite.
    pub fn upsert_invite(&self, invite: &PendingInviteRow) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pending_invites
                 (token, share_id, inviter_address, invited_email, encrypted_metadata,
                  item_count_hint, reminder_count, new_user_assertion, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                invite.token.to_string(),
                invite.share_id.to_string(),
                invite.inviter_address.to_string(),
                invite.invited_email,
                invite.encrypted_metadata,
                invite.item_count_hint,
                invite.reminder_count,
                invite.new_user_assertion,
                invite.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches one pending invite.
    pub fn get_invite(&self, token: InviteToken) -> StorageResult<Option<PendingInviteRow>> {
        self.conn
            .query_row(
                "SELECT token, share_id, inviter_address, invited_email, encrypted_metadata,
                        item_count_hint, reminder_count, new_user_assertion, created_at
                 FROM pending_invites WHERE token = ?1",
                params![token.to_string()],
                invite_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists all pending invites.
    pub fn list_invites(&self) -> StorageResult<Vec<PendingInviteRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT token, share_id, inviter_address, invited_email, encrypted_metadata,
                    item_count_hint, reminder_count, new_user_assertion, created_at
             FROM pending_invites ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], invite_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Removes a pending invite and its attached keys.
    pub fn delete_invite(&self, token: InviteToken) -> StorageResult<()> {
        let token = token.to_string();
        self.conn
            .execute("DELETE FROM invite_keys WHERE token = ?1", params![token])?;
        self.conn.execute(
            "DELETE FROM pending_invites WHERE token = ?1",
            params![token],
        )?;
        Ok(())
    }

    /// Bumps the reminder counter for an invite.
    pub fn increment_reminder(&self, token: InviteToken) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE pending_invites SET reminder_count = reminder_count + 1 WHERE token = ?1",
            params![token.to_string()],
        )?;
        Ok(())
    }

    /// Attaches one (rotation, sealed key) pair to an invite.
    pub fn insert_invite_key(&self, key: &InviteKeyRow) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO invite_keys (token, rotation, sealed_key) VALUES (?1, ?2, ?3)",
            params![
                key.token.to_string(),
                key.rotation.value(),
                key.sealed_key,
            ],
        )?;
        Ok(())
    }

    /// All sealed keys attached to an invite, ascending by rotation.
    pub fn get_invite_keys(&self, token: InviteToken) -> StorageResult<Vec<InviteKeyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT token, rotation, sealed_key FROM invite_keys
             WHERE token = ?1 ORDER BY rotation",
        )?;
        let rows = stmt.query_map(params![token.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        rows.map(|r| {
            let (token, rotation, sealed_key) = r?;
            Ok(InviteKeyRow {
                token: parse_id(&token, "invite_keys.token")?,
                rotation: KeyRotation::new(rotation),
                sealed_key,
            })
        })
        .collect()
    }

    // ── Event cursors ────────────────────────────────────────────

    /// Reads the stored cursor for a scope.
    pub fn get_cursor(&self, scope_key: &str) -> StorageResult<Option<EventCursor>> {
        self.conn
            .query_row(
                "SELECT cursor FROM event_cursors WHERE scope_key = ?1",
                params![scope_key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|opt| opt.map(EventCursor::new))
            .map_err(Into::into)
    }

    /// Stores the cursor for a scope (forward movement is the caller's
    /// invariant; the store just persists what was applied).
    pub fn set_cursor(&self, scope_key: &str, cursor: &EventCursor) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO event_cursors (scope_key, cursor, updated_at)
             VALUES (?1, ?2, ?3)",
            params![scope_key, cursor.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Drops the cursor for a scope, forcing the next pass to full-refresh.
    pub fn clear_cursor(&self, scope_key: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM event_cursors WHERE scope_key = ?1",
            params![scope_key],
        )?;
        Ok(())
    }

    /// All stored cursors (diagnostics).
    pub fn list_cursors(&self) -> StorageResult<Vec<CursorRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope_key, cursor, updated_at FROM event_cursors")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        rows.map(|r| {
            let (scope_key, cursor, updated_at) = r?;
            Ok(CursorRow {
                scope_key,
                cursor: EventCursor::new(cursor),
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .collect()
    }
}

// ── Row mapping ──────────────────────────────────────────────────

fn parse_id<T: FromStr>(value: &str, column: &str) -> Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid id in {column}: {value}").into(),
        )
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid timestamp: {e}").into(),
            )
        })
}

fn parse_enum<T>(
    parse: impl FnOnce(&str) -> Option<T>,
    value: &str,
    column: &str,
) -> Result<T, rusqlite::Error> {
    parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid {column}: {value}").into(),
        )
    })
}

fn share_from_row(row: &Row<'_>) -> Result<ShareRow, rusqlite::Error> {
    Ok(ShareRow {
        id: parse_id::<ShareId>(&row.get::<_, String>(0)?, "shares.id")?,
        owner_address: parse_id::<AddressId>(&row.get::<_, String>(1)?, "shares.owner_address")?,
        latest_rotation: KeyRotation::new(row.get(2)?),
        encrypted_metadata: row.get(3)?,
        metadata_rotation: KeyRotation::new(row.get(4)?),
        role: parse_enum(ShareRole::parse, &row.get::<_, String>(5)?, "shares.role")?,
        owned: row.get::<_, i64>(6)? != 0,
        verifying_key: row.get(7)?,
        wrapped_signing_key: row.get(8)?,
        created_at: parse_timestamp(&row.get::<_, String>(9)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(10)?)?,
    })
}

fn share_key_from_row(row: &Row<'_>) -> Result<ShareKeyRow, rusqlite::Error> {
    Ok(ShareKeyRow {
        share_id: parse_id::<ShareId>(&row.get::<_, String>(0)?, "share_keys.share_id")?,
        rotation: KeyRotation::new(row.get(1)?),
        received_form: row.get(2)?,
        local_form: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?)?,
    })
}

fn item_from_row(row: &Row<'_>) -> Result<ItemRow, rusqlite::Error> {
    Ok(ItemRow {
        id: parse_id::<ItemId>(&row.get::<_, String>(0)?, "items.id")?,
        share_id: parse_id::<ShareId>(&row.get::<_, String>(1)?, "items.share_id")?,
        revision: ItemRevision::new(row.get::<_, i64>(2)? as u64),
        content_format_version: row.get(3)?,
        encrypted_content: row.get(4)?,
        key_packet: row.get(5)?,
        state: parse_enum(ItemState::parse, &row.get::<_, String>(6)?, "items.state")?,
        rotation: KeyRotation::new(row.get(7)?),
        confirmed: row.get::<_, i64>(8)? != 0,
        created_at: parse_timestamp(&row.get::<_, String>(9)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(10)?)?,
    })
}

fn invite_from_row(row: &Row<'_>) -> Result<PendingInviteRow, rusqlite::Error> {
    Ok(PendingInviteRow {
        token: parse_id::<InviteToken>(&row.get::<_, String>(0)?, "pending_invites.token")?,
        share_id: parse_id::<ShareId>(&row.get::<_, String>(1)?, "pending_invites.share_id")?,
        inviter_address: parse_id::<AddressId>(
            &row.get::<_, String>(2)?,
            "pending_invites.inviter_address",
        )?,
        invited_email: row.get(3)?,
        encrypted_metadata: row.get(4)?,
        item_count_hint: row.get(5)?,
        reminder_count: row.get(6)?,
        new_user_assertion: row.get(7)?,
        created_at: parse_timestamp(&row.get::<_, String>(8)?)?,
    })
}
