mod common;

use chrono::Utc;
use common::{engine_with_replica, fast_config, seal_for, test_session, FakeRemote};
use sealbox_crypto::{AddressKeypair, SecretKey};
use sealbox_engine::{Engine, EngineError, RemoteShareKey, UserSession};
use sealbox_types::{AddressId, KeyRotation, ShareId, UserId};

fn seed_ladder(
    remote: &FakeRemote,
    share: ShareId,
    keypair: &AddressKeypair,
    rotations: u32,
) -> Vec<SecretKey> {
    let mut keys = Vec::new();
    for n in 0..rotations {
        let key = SecretKey::generate();
        remote.add_share_key(
            share,
            RemoteShareKey {
                rotation: KeyRotation::new(n),
                sealed_key: seal_for(keypair, &key),
                created_at: Utc::now(),
            },
        );
        keys.push(key);
    }
    keys
}

#[tokio::test]
async fn fetches_ladder_and_resolves_latest() {
    let session = test_session();
    let remote = FakeRemote::new();
    let share = ShareId::new();
    seed_ladder(&remote, share, session.address_keys(), 3);
    let (engine, _replica) = engine_with_replica(remote, session);

    let ladder = engine.keys.get_keys(share, false).await.unwrap();
    assert_eq!(ladder.len(), 3);
    assert!(ladder.windows(2).all(|w| w[0].rotation < w[1].rotation));

    let latest = engine.keys.get_latest_key(share).await.unwrap();
    assert_eq!(latest.rotation, KeyRotation::new(2));
}

#[tokio::test]
async fn rotation_lookup_is_exact() {
    let session = test_session();
    let remote = FakeRemote::new();
    let share = ShareId::new();
    let seeded = seed_ladder(&remote, share, session.address_keys(), 2);
    let (engine, _replica) = engine_with_replica(remote, session);

    let key = engine
        .keys
        .get_key_for_rotation(share, KeyRotation::INITIAL)
        .await
        .unwrap();
    assert_eq!(key.key.as_bytes(), seeded[0].as_bytes());
    assert_eq!(key.rotation, KeyRotation::INITIAL);
}

#[tokio::test]
async fn missing_rotation_is_never_substituted() {
    let session = test_session();
    let remote = FakeRemote::new();
    let share = ShareId::new();
    seed_ladder(&remote, share, session.address_keys(), 2);
    let (engine, _replica) = engine_with_replica(remote, session);

    let err = engine
        .keys
        .get_key_for_rotation(share, KeyRotation::new(7))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn key_sealed_to_another_address_is_rejected() {
    let session = test_session();
    let remote = FakeRemote::new();
    let share = ShareId::new();
    let stranger = AddressKeypair::generate();
    remote.add_share_key(
        share,
        RemoteShareKey {
            rotation: KeyRotation::INITIAL,
            sealed_key: seal_for(&stranger, &SecretKey::generate()),
            created_at: Utc::now(),
        },
    );
    let (engine, _replica) = engine_with_replica(remote, session);

    let err = engine.keys.get_keys(share, false).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidKeyMaterial { share: s, rotation } if s == share && rotation == KeyRotation::INITIAL
    ));
}

#[tokio::test]
async fn concurrent_lookups_share_one_remote_fetch() {
    let session = test_session();
    let remote = FakeRemote::new();
    let share = ShareId::new();
    seed_ladder(&remote, share, session.address_keys(), 2);
    // Keep the first fetch in flight long enough for the second caller to
    // pile onto it.
    remote.set_latency(std::time::Duration::from_millis(20));
    let (engine, _replica) = engine_with_replica(remote.clone(), session);

    let (a, b) = tokio::join!(
        engine.keys.get_latest_key(share),
        engine.keys.get_latest_key(share),
    );
    assert_eq!(a.unwrap().rotation, KeyRotation::new(1));
    assert_eq!(b.unwrap().rotation, KeyRotation::new(1));
    assert_eq!(remote.key_fetch_count(), 1);
}

#[tokio::test]
async fn ingested_keys_are_readable_without_the_remote() {
    let user = UserId::new();
    let address = AddressId::new();
    let keypair = AddressKeypair::generate();
    let at_rest = SecretKey::generate();

    let remote = FakeRemote::new();
    let share = ShareId::new();
    seed_ladder(&remote, share, &keypair, 2);

    let session = UserSession::new(user, address, keypair.clone(), at_rest.clone());
    let (engine, replica) = engine_with_replica(remote, session);
    engine.keys.get_keys(share, false).await.unwrap();

    // Same replica and session material, but a remote that knows nothing.
    let offline_session = UserSession::new(user, address, keypair, at_rest);
    let offline = Engine::with_config(replica, FakeRemote::new(), offline_session, fast_config());
    let latest = offline.keys.get_latest_key(share).await.unwrap();
    assert_eq!(latest.rotation, KeyRotation::new(1));
}

#[tokio::test]
async fn refresh_never_regresses_an_existing_rotation() {
    let user = UserId::new();
    let address = AddressId::new();
    let keypair = AddressKeypair::generate();
    let at_rest = SecretKey::generate();

    let remote = FakeRemote::new();
    let share = ShareId::new();
    let seeded = seed_ladder(&remote, share, &keypair, 1);

    let session = UserSession::new(user, address, keypair.clone(), at_rest);
    let (engine, _replica) = engine_with_replica(remote.clone(), session);

    let first = engine.keys.get_latest_key(share).await.unwrap();
    assert_eq!(first.key.as_bytes(), seeded[0].as_bytes());

    // A remote that later answers with different bytes for rotation 0 must
    // not displace the key already persisted.
    remote.add_share_key(
        share,
        RemoteShareKey {
            rotation: KeyRotation::INITIAL,
            sealed_key: seal_for(&keypair, &SecretKey::generate()),
            created_at: Utc::now(),
        },
    );
    engine.keys.get_keys(share, true).await.unwrap();

    let after = engine
        .keys
        .get_key_for_rotation(share, KeyRotation::INITIAL)
        .await
        .unwrap();
    assert_eq!(after.key.as_bytes(), seeded[0].as_bytes());
}
