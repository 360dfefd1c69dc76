use sealbox_crypto::{
    decrypt, decrypt_string, encrypt, encrypt_string, CipherBlob, SecretKey, NONCE_SIZE,
};

// ── Roundtrips ───────────────────────────────────────────────────

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = SecretKey::generate();
    let plaintext = b"the quick brown fox";

    let blob = encrypt(&key, plaintext).unwrap();
    let decrypted = decrypt(&key, &blob).unwrap();

    assert_eq!(decrypted, plaintext);
}

#[test]
fn empty_plaintext_roundtrip() {
    let key = SecretKey::generate();
    let blob = encrypt(&key, b"").unwrap();
    assert_eq!(decrypt(&key, &blob).unwrap(), b"");
}

#[test]
fn string_roundtrip_via_base64() {
    let key = SecretKey::generate();
    let encoded = encrypt_string(&key, "vault metadata ✓").unwrap();
    assert_eq!(decrypt_string(&key, &encoded).unwrap(), "vault metadata ✓");
}

#[test]
fn blob_serde_roundtrip() {
    let key = SecretKey::generate();
    let blob = encrypt(&key, b"secret").unwrap();

    let json = serde_json::to_string(&blob).unwrap();
    let restored: CipherBlob = serde_json::from_str(&json).unwrap();
    assert_eq!(decrypt(&key, &restored).unwrap(), b"secret");
}

// ── Failure cases ────────────────────────────────────────────────

#[test]
fn wrong_key_fails() {
    let key = SecretKey::generate();
    let other = SecretKey::generate();

    let blob = encrypt(&key, b"secret").unwrap();
    assert!(decrypt(&other, &blob).is_err());
}

#[test]
fn tampered_ciphertext_fails() {
    let key = SecretKey::generate();
    let blob = encrypt(&key, b"secret").unwrap();

    let mut bytes = blob.as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tampered = CipherBlob::from_bytes(bytes).unwrap();

    assert!(decrypt(&key, &tampered).is_err());
}

#[test]
fn tampered_nonce_fails() {
    let key = SecretKey::generate();
    let blob = encrypt(&key, b"secret").unwrap();

    let mut bytes = blob.as_bytes().to_vec();
    bytes[0] ^= 0x01;
    let tampered = CipherBlob::from_bytes(bytes).unwrap();

    assert!(decrypt(&key, &tampered).is_err());
}

#[test]
fn too_short_blob_rejected() {
    assert!(CipherBlob::from_bytes(vec![0u8; NONCE_SIZE + 3]).is_err());
}

#[test]
fn invalid_base64_rejected() {
    assert!(CipherBlob::from_base64("not base64 !!!").is_err());
}

// ── Nonce behavior ───────────────────────────────────────────────

#[test]
fn nonces_are_unique_per_encryption() {
    let key = SecretKey::generate();
    let a = encrypt(&key, b"same input").unwrap();
    let b = encrypt(&key, b"same input").unwrap();

    assert_ne!(a.as_bytes()[..NONCE_SIZE], b.as_bytes()[..NONCE_SIZE]);
    assert_ne!(a.as_bytes()[NONCE_SIZE..], b.as_bytes()[NONCE_SIZE..]);
}
