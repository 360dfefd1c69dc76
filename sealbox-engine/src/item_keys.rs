//! Item key derivation.
//!
//! Every item is encrypted under an item key. Where the key comes from
//! depends on the content format: v1 items use the share key of their
//! rotation directly; later formats carry a signed key packet whose wrapped
//! key is unwrapped under that same share key. The packet signature is
//! checked against the share's verifying key before anything is unwrapped.

use crate::error::{EngineError, EngineResult};
use crate::share_keys::ShareKey;
use sealbox_crypto::{open_item_key, KeyPacket, SecretKey, VerifyingKey};
use sealbox_storage::ShareRow;
use sealbox_types::ItemId;

/// Content format whose items are encrypted under the share key directly.
pub const FORMAT_SHARED_KEY: u16 = 1;

/// Current content format: per-item keys carried in signed packets.
pub const FORMAT_ITEM_KEY: u16 = 2;

/// Resolves the decryption key for one item.
pub struct ItemKeyDeriver;

impl ItemKeyDeriver {
    /// Derives the item key from the share key of the item's rotation and
    /// its key packet, if any.
    ///
    /// A missing packet on a format that requires one, a bad signature, or
    /// an unwrap failure are all fatal for this item only.
    pub fn derive(
        share: &ShareRow,
        share_key: &ShareKey,
        item: ItemId,
        content_format_version: u16,
        packet: Option<&KeyPacket>,
    ) -> EngineResult<SecretKey> {
        match packet {
            None if content_format_version == FORMAT_SHARED_KEY => {
                Ok(share_key.key.clone())
            }
            None => Err(EngineError::Integrity {
                share: share.id,
                item: Some(item),
                rotation: Some(share_key.rotation),
                detail: format!(
                    "format v{content_format_version} item has no key packet"
                ),
            }),
            Some(packet) => {
                let verifier =
                    VerifyingKey::from_base64(&share.verifying_key).map_err(|_| {
                        EngineError::Integrity {
                            share: share.id,
                            item: Some(item),
                            rotation: Some(share_key.rotation),
                            detail: "share verifying key is unparseable".to_string(),
                        }
                    })?;
                open_item_key(&share_key.key, packet, &verifier).map_err(|e| {
                    EngineError::Integrity {
                        share: share.id,
                        item: Some(item),
                        rotation: Some(share_key.rotation),
                        detail: format!("key packet rejected: {e}"),
                    }
                })
            }
        }
    }
}
