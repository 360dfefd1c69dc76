use sealbox_crypto::{
    unwrap_key, wrap_key, AddressKeypair, AddressPublicKey, SecretKey, WrappedKey,
};

// ── Symmetric wrapping ───────────────────────────────────────────

#[test]
fn wrap_unwrap_roundtrip() {
    let wrapping = SecretKey::generate();
    let key = SecretKey::generate();

    let wrapped = wrap_key(&wrapping, &key).unwrap();
    let unwrapped = unwrap_key(&wrapping, &wrapped).unwrap();

    assert_eq!(unwrapped.as_bytes(), key.as_bytes());
}

#[test]
fn unwrap_with_wrong_key_fails() {
    let wrapping = SecretKey::generate();
    let key = SecretKey::generate();

    let wrapped = wrap_key(&wrapping, &key).unwrap();
    assert!(unwrap_key(&SecretKey::generate(), &wrapped).is_err());
}

#[test]
fn wrapped_key_base64_roundtrip() {
    let wrapping = SecretKey::generate();
    let key = SecretKey::generate();

    let wrapped = wrap_key(&wrapping, &key).unwrap();
    let restored = WrappedKey::from_base64(&wrapped.to_base64()).unwrap();
    let unwrapped = unwrap_key(&wrapping, &restored).unwrap();

    assert_eq!(unwrapped.as_bytes(), key.as_bytes());
}

// ── Sealed-box wrapping ──────────────────────────────────────────

#[test]
fn seal_open_roundtrip() {
    let address = AddressKeypair::generate();
    let key = SecretKey::generate();

    let sealed = address.public_key().seal_key(&key).unwrap();
    let opened = address.open_sealed_key(&sealed).unwrap();

    assert_eq!(opened.as_bytes(), key.as_bytes());
}

#[test]
fn wrong_address_cannot_open() {
    let address = AddressKeypair::generate();
    let other = AddressKeypair::generate();
    let key = SecretKey::generate();

    let sealed = address.public_key().seal_key(&key).unwrap();
    assert!(other.open_sealed_key(&sealed).is_err());
}

#[test]
fn address_keypair_secret_roundtrip() {
    let address = AddressKeypair::generate();
    let restored = AddressKeypair::from_secret_bytes(address.secret_bytes());
    let key = SecretKey::generate();

    let sealed = address.public_key().seal_key(&key).unwrap();
    let opened = restored.open_sealed_key(&sealed).unwrap();
    assert_eq!(opened.as_bytes(), key.as_bytes());
}

#[test]
fn public_key_bytes_roundtrip() {
    let address = AddressKeypair::generate();
    let bytes = address.public_key().to_bytes();
    let restored = AddressPublicKey::from_bytes(&bytes).unwrap();
    assert_eq!(restored, address.public_key());
}

#[test]
fn truncated_public_key_rejected() {
    assert!(AddressPublicKey::from_bytes(&[0u8; 16]).is_err());
}
