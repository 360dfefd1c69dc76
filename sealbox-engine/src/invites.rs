//! Invitations: granting another user access to a vault.
//!
//! Access is granted by re-wrapping the vault's key ladder for the invitee.
//! For a registered invitee the re-wrap happens at send time against their
//! current address key. For a not-yet-registered invitee the wrap is
//! deferred: the inviter signs an assertion binding the target email to the
//! ladder as it stood, and the confirm step re-validates that assertion
//! before any key material is wrapped.

use crate::error::{EngineError, EngineResult};
use crate::remote::{
    InviteRequest, InviteTarget, NewUserAssertion, RemoteApi, RemoteInvite,
};
use crate::session::UserSession;
use crate::shares::{share_row_from_remote, ShareStore};
use crate::share_keys::ShareKeyStore;
use sealbox_crypto::{AddressPublicKey, SealedKey, Signature, VerifyingKey};
use sealbox_storage::{InviteKeyRow, PendingInviteRow, Replica};
use sealbox_types::{InviteToken, ItemState, KeyRotation, ShareId};
use std::sync::Arc;
use tracing::{info, warn};

/// Invitation operations for one user session.
pub struct InviteEngine {
    replica: Arc<Replica>,
    remote: Arc<dyn RemoteApi>,
    keys: Arc<ShareKeyStore>,
    shares: Arc<ShareStore>,
    session: Arc<UserSession>,
}

impl InviteEngine {
    pub fn new(
        replica: Arc<Replica>,
        remote: Arc<dyn RemoteApi>,
        keys: Arc<ShareKeyStore>,
        shares: Arc<ShareStore>,
        session: Arc<UserSession>,
    ) -> Self {
        Self {
            replica,
            remote,
            keys,
            shares,
            session,
        }
    }

    /// Invites a registered user: every rotation of the vault's ladder is
    /// re-wrapped to the invitee's current address key at send time.
    ///
    /// An unknown email surfaces as [`EngineError::NotFound`].
    pub async fn invite_existing_user(
        &self,
        share_id: ShareId,
        email: &str,
    ) -> EngineResult<PendingInviteRow> {
        let invitee_key = self.resolve_invitee_key(email).await?;
        let sealed = self.wrap_ladder_for(share_id, &invitee_key, None).await?;

        let request = InviteRequest {
            share_id,
            target: InviteTarget::ExistingUser {
                email: email.to_string(),
                keys: sealed,
            },
            encrypted_metadata: self.metadata_snapshot(share_id)?,
            item_count_hint: self.item_count(share_id)?,
        };

        let remote_invite = self
            .remote
            .send_invite(request)
            .await
            .map_err(EngineError::from_remote)?;

        let row = self.persist_invite(&remote_invite)?;
        info!(share = %share_id, token = %row.token, "invite sent");
        Ok(row)
    }

    /// Invites a user who has not registered yet. No key material leaves
    /// the device; instead the inviter signs an assertion freezing the
    /// target email and the ladder's highest rotation, checked again at
    /// confirm time.
    pub async fn invite_new_user(
        &self,
        share_id: ShareId,
        email: &str,
    ) -> EngineResult<PendingInviteRow> {
        let share = self.shares.get_by_id(share_id)?;
        let wrapped = share.wrapped_signing_key.as_deref().ok_or_else(|| {
            EngineError::InvalidState(format!(
                "no signing capability for share {share_id}; cannot assert an invite"
            ))
        })?;
        let signer = self.session.unwrap_signing_capability(wrapped)?;

        let highest = self.keys.get_latest_key(share_id).await?.rotation;
        let signature = signer
            .sign(&NewUserAssertion::signed_bytes(share_id, email, highest))
            .to_bytes()
            .to_vec();
        let assertion = NewUserAssertion {
            share_id,
            email: email.to_string(),
            highest_rotation: highest,
            signature,
        };

        let request = InviteRequest {
            share_id,
            target: InviteTarget::NewUser {
                email: email.to_string(),
                assertion,
            },
            encrypted_metadata: self.metadata_snapshot(share_id)?,
            item_count_hint: self.item_count(share_id)?,
        };

        let remote_invite = self
            .remote
            .send_invite(request)
            .await
            .map_err(EngineError::from_remote)?;

        let row = self.persist_invite(&remote_invite)?;
        info!(share = %share_id, token = %row.token, "deferred invite sent");
        Ok(row)
    }

    /// Completes a deferred new-user invite once the invitee has registered.
    ///
    /// The stored assertion is re-verified against the share's verifying
    /// key and the now-resolvable email before any rotation is wrapped, and
    /// only rotations up to the asserted ceiling are released.
    pub async fn confirm_new_user_invite(&self, token: InviteToken) -> EngineResult<()> {
        let invite = self.require_invite(token)?;
        let assertion: NewUserAssertion = invite
            .new_user_assertion
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .ok_or_else(|| {
                EngineError::InvalidState(format!("invite {token} is not a deferred invite"))
            })?;

        self.verify_assertion(invite.share_id, &assertion)?;
        if assertion.email != invite.invited_email {
            return Err(EngineError::Integrity {
                share: invite.share_id,
                item: None,
                rotation: None,
                detail: "invite target does not match the asserted email".to_string(),
            });
        }

        let invitee_key = self.resolve_invitee_key(&assertion.email).await?;
        let sealed = self
            .wrap_ladder_for(invite.share_id, &invitee_key, Some(assertion.highest_rotation))
            .await?;

        self.remote
            .confirm_invite(token, sealed.clone())
            .await
            .map_err(EngineError::from_remote)?;

        self.replica.transaction(|r| {
            for (rotation, key) in &sealed {
                r.insert_invite_key(&InviteKeyRow {
                    token,
                    rotation: *rotation,
                    sealed_key: key.to_base64(),
                })?;
            }
            Ok(())
        })?;
        info!(%token, "deferred invite confirmed");
        Ok(())
    }

    /// Accepts an invite addressed to the local user. The sealed keys are
    /// ingested before the remote acceptance so the vault is readable the
    /// moment the share appears.
    pub async fn accept_invite(&self, token: InviteToken) -> EngineResult<ShareId> {
        let invite = self.require_invite(token)?;

        let key_rows = self.replica.with(|r| r.get_invite_keys(token))?;
        let mut sealed = Vec::with_capacity(key_rows.len());
        for row in &key_rows {
            let key = SealedKey::from_base64(&row.sealed_key).map_err(|_| {
                EngineError::InvalidKeyMaterial {
                    share: invite.share_id,
                    rotation: row.rotation,
                }
            })?;
            sealed.push((row.rotation, key, invite.created_at));
        }
        self.keys.ingest_sealed_keys(invite.share_id, &sealed).await?;

        let remote_share = self
            .remote
            .accept_invite(token)
            .await
            .map_err(EngineError::from_remote)?;

        self.replica.transaction(|r| {
            r.upsert_share(&share_row_from_remote(&remote_share, None))?;
            r.delete_invite(token)?;
            Ok(())
        })?;
        self.shares.publish()?;
        info!(%token, share = %invite.share_id, "invite accepted");
        Ok(invite.share_id)
    }

    /// Declines an invite addressed to the local user.
    pub async fn reject_invite(&self, token: InviteToken) -> EngineResult<()> {
        self.remote
            .reject_invite(token)
            .await
            .map_err(EngineError::from_remote)?;
        self.replica.with(|r| r.delete_invite(token))?;
        Ok(())
    }

    /// Withdraws an invite the local user sent.
    pub async fn cancel_invite(&self, token: InviteToken) -> EngineResult<()> {
        self.remote
            .cancel_invite(token)
            .await
            .map_err(EngineError::from_remote)?;
        self.replica.with(|r| r.delete_invite(token))?;
        Ok(())
    }

    /// Nudges the invitee again and bumps the local reminder counter.
    pub async fn send_reminder(&self, token: InviteToken) -> EngineResult<u32> {
        self.remote
            .send_invite_reminder(token)
            .await
            .map_err(EngineError::from_remote)?;
        self.replica.with(|r| r.increment_reminder(token))?;
        let invite = self.require_invite(token)?;
        Ok(invite.reminder_count)
    }

    /// Lists locally known pending invites.
    pub fn list_pending(&self) -> EngineResult<Vec<PendingInviteRow>> {
        Ok(self.replica.with(|r| r.list_invites())?)
    }

    /// Reconciles the local pending-invite list against the remote's.
    pub async fn sync_invites(&self) -> EngineResult<Vec<PendingInviteRow>> {
        let remote_invites = self
            .remote
            .fetch_pending_invites(self.session.user_id)
            .await
            .map_err(EngineError::from_remote)?;

        let local = self.replica.with(|r| r.list_invites())?;
        let gone: Vec<InviteToken> = local
            .iter()
            .map(|i| i.token)
            .filter(|t| !remote_invites.iter().any(|r| r.token == *t))
            .collect();

        // Keep local reminder counters across refreshes.
        let mut rows = Vec::with_capacity(remote_invites.len());
        for invite in &remote_invites {
            let reminder_count = local
                .iter()
                .find(|existing| existing.token == invite.token)
                .map_or(0, |existing| existing.reminder_count);
            rows.push((invite, invite_row(invite, reminder_count)?));
        }

        self.replica.transaction(|r| {
            for (invite, row) in &rows {
                r.upsert_invite(row)?;
                for (rotation, key) in &invite.keys {
                    r.insert_invite_key(&InviteKeyRow {
                        token: invite.token,
                        rotation: *rotation,
                        sealed_key: key.to_base64(),
                    })?;
                }
            }
            for token in &gone {
                r.delete_invite(*token)?;
            }
            Ok(())
        })?;

        self.list_pending()
    }

    // ── Internals ────────────────────────────────────────────────

    fn require_invite(&self, token: InviteToken) -> EngineResult<PendingInviteRow> {
        self.replica
            .with(|r| r.get_invite(token))?
            .ok_or_else(|| EngineError::NotFound(format!("invite {token}")))
    }

    async fn resolve_invitee_key(&self, email: &str) -> EngineResult<AddressPublicKey> {
        let bytes = self
            .remote
            .resolve_address_keys(email)
            .await
            .map_err(EngineError::from_remote)?;
        AddressPublicKey::from_bytes(&bytes)
            .map_err(|_| EngineError::InvalidState(format!("unparseable address key for {email}")))
    }

    /// Re-wraps the vault's ladder (optionally capped at `up_to`) to an
    /// invitee's address key. Seals the raw keys, never the stored forms.
    async fn wrap_ladder_for(
        &self,
        share_id: ShareId,
        invitee_key: &AddressPublicKey,
        up_to: Option<KeyRotation>,
    ) -> EngineResult<Vec<(KeyRotation, SealedKey)>> {
        let ladder = self.keys.get_keys(share_id, false).await?;
        if ladder.is_empty() {
            return Err(EngineError::NotFound(format!("no keys for share {share_id}")));
        }
        let mut sealed = Vec::with_capacity(ladder.len());
        for entry in &ladder {
            if let Some(cap) = up_to {
                if entry.rotation > cap {
                    warn!(share = %share_id, rotation = %entry.rotation, "rotation above asserted ceiling withheld");
                    continue;
                }
            }
            let key = invitee_key.seal_key(&entry.key).map_err(|_| {
                EngineError::InvalidKeyMaterial {
                    share: share_id,
                    rotation: entry.rotation,
                }
            })?;
            sealed.push((entry.rotation, key));
        }
        Ok(sealed)
    }

    fn verify_assertion(
        &self,
        share_id: ShareId,
        assertion: &NewUserAssertion,
    ) -> EngineResult<()> {
        let share = self.shares.get_by_id(share_id)?;
        let integrity = |detail: String| EngineError::Integrity {
            share: share_id,
            item: None,
            rotation: None,
            detail,
        };

        if assertion.share_id != share_id {
            return Err(integrity("assertion bound to a different share".to_string()));
        }
        let verifier = VerifyingKey::from_base64(&share.verifying_key)
            .map_err(|_| integrity("share verifying key is unparseable".to_string()))?;
        let sig_bytes: [u8; 64] = assertion
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| integrity("malformed assertion signature".to_string()))?;
        verifier
            .verify(
                &NewUserAssertion::signed_bytes(
                    assertion.share_id,
                    &assertion.email,
                    assertion.highest_rotation,
                ),
                &Signature::from_bytes(&sig_bytes),
            )
            .map_err(|_| integrity("assertion signature rejected".to_string()))
    }

    fn metadata_snapshot(&self, share_id: ShareId) -> EngineResult<String> {
        let share = self.shares.get_by_id(share_id)?;
        share.encrypted_metadata.ok_or_else(|| {
            EngineError::InvalidState(format!("share {share_id} has no metadata to snapshot"))
        })
    }

    fn item_count(&self, share_id: ShareId) -> EngineResult<u32> {
        let items = self
            .replica
            .with(|r| r.list_items(share_id, Some(ItemState::Active)))?;
        Ok(items.len() as u32)
    }

    fn persist_invite(&self, remote: &RemoteInvite) -> EngineResult<PendingInviteRow> {
        let row = invite_row(remote, 0)?;
        self.replica.transaction(|r| {
            r.upsert_invite(&row)?;
            for (rotation, key) in &remote.keys {
                r.insert_invite_key(&InviteKeyRow {
                    token: remote.token,
                    rotation: *rotation,
                    sealed_key: key.to_base64(),
                })?;
            }
            Ok(())
        })?;
        Ok(row)
    }
}

fn invite_row(remote: &RemoteInvite, reminder_count: u32) -> EngineResult<PendingInviteRow> {
    Ok(PendingInviteRow {
        token: remote.token,
        share_id: remote.share_id,
        inviter_address: remote.inviter_address,
        invited_email: remote.invited_email.clone(),
        encrypted_metadata: remote.encrypted_metadata.clone(),
        item_count_hint: remote.item_count_hint,
        reminder_count,
        new_user_assertion: remote
            .new_user_assertion
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        created_at: remote.created_at,
    })
}
