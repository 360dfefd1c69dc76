//! Property-based tests for the crypto boundary.
//!
//! Verifies the properties the engine relies on:
//! - Encryption is reversible with the correct key only
//! - Tampering is always detected
//! - Wrapping round-trips the exact key bytes
//! - The local key derivation is deterministic per (passphrase, salt)

use proptest::prelude::*;
use sealbox_crypto::{
    decrypt, derive_local_key, encrypt, unwrap_key, wrap_key, CipherBlob, KdfParams, Salt,
    SecretKey, NONCE_SIZE,
};

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn key_strategy() -> impl Strategy<Value = SecretKey> {
    prop::array::uniform32(any::<u8>()).prop_map(SecretKey::from_bytes)
}

fn salt_strategy() -> impl Strategy<Value = Salt> {
    prop::array::uniform16(any::<u8>()).prop_map(Salt::from_bytes)
}

fn passphrase_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9!@#$%^&*()]{1,64}").unwrap()
}

proptest! {
    /// Encrypt then decrypt with the same key returns the original bytes.
    #[test]
    fn roundtrip_preserves_data(key in key_strategy(), plaintext in plaintext_strategy()) {
        let encrypted = encrypt(&key, &plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    /// A different key never decrypts successfully.
    #[test]
    fn wrong_key_always_fails(
        key in key_strategy(),
        other in key_strategy(),
        plaintext in plaintext_strategy(),
    ) {
        prop_assume!(key != other);
        let encrypted = encrypt(&key, &plaintext).unwrap();
        prop_assert!(decrypt(&other, &encrypted).is_err());
    }

    /// Any single-bit flip in the ciphertext is detected.
    #[test]
    fn tampering_is_detected(
        key in key_strategy(),
        plaintext in plaintext_strategy(),
        byte_index in any::<usize>(),
        bit in 0u8..8,
    ) {
        let blob = encrypt(&key, &plaintext).unwrap();
        let mut bytes = blob.as_bytes().to_vec();
        // Stay within the ciphertext+tag region; the tag is always present.
        let index = NONCE_SIZE + byte_index % (bytes.len() - NONCE_SIZE);
        bytes[index] ^= 1 << bit;
        let tampered = CipherBlob::from_bytes(bytes).unwrap();
        prop_assert!(decrypt(&key, &tampered).is_err());
    }

    /// Wrapping a key and unwrapping it returns identical bytes.
    #[test]
    fn wrap_roundtrip(wrapping in key_strategy(), key in key_strategy()) {
        let wrapped = wrap_key(&wrapping, &key).unwrap();
        let unwrapped = unwrap_key(&wrapping, &wrapped).unwrap();
        prop_assert_eq!(unwrapped.as_bytes(), key.as_bytes());
    }
}

proptest! {
    // KDF cases are slow even with fast params; keep the case count low.
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Derivation is deterministic for the same passphrase and salt.
    #[test]
    fn derivation_is_deterministic(passphrase in passphrase_strategy(), salt in salt_strategy()) {
        let params = KdfParams::fast_insecure();
        let a = derive_local_key(&passphrase, &salt, &params).unwrap();
        let b = derive_local_key(&passphrase, &salt, &params).unwrap();
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    /// Different salts give different keys.
    #[test]
    fn salt_changes_key(passphrase in passphrase_strategy(), a in salt_strategy(), b in salt_strategy()) {
        prop_assume!(a != b);
        let params = KdfParams::fast_insecure();
        let ka = derive_local_key(&passphrase, &a, &params).unwrap();
        let kb = derive_local_key(&passphrase, &b, &params).unwrap();
        prop_assert_ne!(ka.as_bytes(), kb.as_bytes());
    }
}
