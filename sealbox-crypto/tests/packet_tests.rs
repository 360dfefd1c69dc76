use sealbox_crypto::{
    open_item_key, seal_item_key, CryptoError, KeyPacket, SecretKey, SigningCapability,
    WrappedKey, NONCE_SIZE,
};

#[test]
fn seal_open_roundtrip() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();

    let packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    let opened = open_item_key(&share_key, &packet, &signer.verifying_key()).unwrap();

    assert_eq!(opened.as_bytes(), item_key.as_bytes());
}

#[test]
fn packet_survives_json_storage() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();

    let packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    let json = serde_json::to_string(&packet).unwrap();
    let restored: KeyPacket = serde_json::from_str(&json).unwrap();

    let opened = open_item_key(&share_key, &restored, &signer.verifying_key()).unwrap();
    assert_eq!(opened.as_bytes(), item_key.as_bytes());
}

#[test]
fn wrong_verifier_rejects_packet() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();
    let other = SigningCapability::generate();

    let packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    let err = open_item_key(&share_key, &packet, &other.verifying_key()).unwrap_err();

    assert!(matches!(err, CryptoError::SignatureInvalid));
}

#[test]
fn tampered_wrapped_key_rejected_before_unwrap() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();

    let mut packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    // Flip the first ciphertext bit of the wrapped key.
    let mut bytes = packet.wrapped_key.as_bytes().to_vec();
    bytes[NONCE_SIZE] ^= 0x01;
    packet.wrapped_key = WrappedKey::from_bytes(bytes).unwrap();

    let err = open_item_key(&share_key, &packet, &signer.verifying_key()).unwrap_err();
    // Signature covers the wrapped form, so tampering fails verification,
    // not decryption.
    assert!(matches!(err, CryptoError::SignatureInvalid));
}

#[test]
fn truncated_signature_rejected() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();

    let mut packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    packet.signature.truncate(32);

    let err = open_item_key(&share_key, &packet, &signer.verifying_key()).unwrap_err();
    assert!(matches!(err, CryptoError::SignatureInvalid));
}

#[test]
fn wrong_share_key_fails_unwrap() {
    let share_key = SecretKey::generate();
    let item_key = SecretKey::generate();
    let signer = SigningCapability::generate();

    let packet = seal_item_key(&share_key, &item_key, &signer).unwrap();
    let err =
        open_item_key(&SecretKey::generate(), &packet, &signer.verifying_key()).unwrap_err();

    assert!(matches!(err, CryptoError::Decryption(_)));
}
