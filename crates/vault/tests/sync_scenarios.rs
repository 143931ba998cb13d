#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    cairn_crypto::generate_key,
    cairn_replica::StateVector,
    cairn_storage::StorageBackend,
    cairn_vault::{
        EncryptedVault, KeySource, LocalPeer, StoreOptions, SyncedVault, VaultError, VaultStatus,
        VaultStore,
    },
    serde::{Deserialize, Serialize},
    serde_json::json,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    body: String,
}

async fn synced_with_key(name: &str, key: &[u8]) -> Arc<SyncedVault> {
    let vault = EncryptedVault::new(name, StorageBackend::memory(name));
    vault.init_with_key(key).await.unwrap();
    SyncedVault::open(vault).await.unwrap()
}

async fn exchange(from: &SyncedVault, to: &SyncedVault) {
    let delta = from.updates_since(&to.state_vector().await).await.unwrap();
    to.apply_update(&delta, Some(from.replica_id().as_str()))
        .await
        .unwrap();
}

#[tokio::test]
async fn put_then_delete_replicates() {
    let key = generate_key();
    let a = synced_with_key("a", key.as_bytes()).await;
    let b = synced_with_key("b", key.as_bytes()).await;

    let item = a.put("k1", json!({"v": 1})).await.unwrap();
    assert_eq!(item.version, 1);

    exchange(&a, &b).await;
    assert!(b.has("k1").await.unwrap());
    let got = b.get_item::<serde_json::Value>("k1").await.unwrap().unwrap();
    assert_eq!(got.value, json!({"v": 1}));
    assert_eq!(got.version, 1);

    a.delete("k1").await.unwrap();
    exchange(&a, &b).await;
    assert!(!b.has("k1").await.unwrap());
}

#[tokio::test]
async fn key_must_be_32_bytes() {
    let short = EncryptedVault::new("short", StorageBackend::memory("short"));
    assert!(matches!(
        short.init_with_key(&[0u8; 16]).await,
        Err(VaultError::InvalidKeyLength { len: 16 })
    ));
    assert_eq!(short.status().await, VaultStatus::Uninitialized);

    let ok = EncryptedVault::new("ok", StorageBackend::memory("ok"));
    ok.init_with_key(&[0u8; 32]).await.unwrap();
    assert_eq!(ok.status().await, VaultStatus::Initialized);
}

#[tokio::test]
async fn three_devices_converge_with_concurrent_edits() {
    let key = generate_key();
    let devices = [
        synced_with_key("phone", key.as_bytes()).await,
        synced_with_key("laptop", key.as_bytes()).await,
        synced_with_key("tablet", key.as_bytes()).await,
    ];

    devices[0]
        .put("shopping", Note {
            title: "groceries".into(),
            body: "milk".into(),
        })
        .await
        .unwrap();
    devices[1].put("todo", json!(["write tests"])).await.unwrap();
    devices[2].put("shopping", json!("tablet wins?")).await.unwrap();
    devices[1].put("scratch", 1).await.unwrap();
    devices[1].delete("scratch").await.unwrap();

    for _ in 0..2 {
        for from in &devices {
            for to in &devices {
                if !Arc::ptr_eq(from, to) {
                    exchange(from, to).await;
                }
            }
        }
    }

    let reference = devices[0].export().await.unwrap();
    for device in &devices[1..] {
        assert_eq!(device.export().await.unwrap(), reference);
        assert_eq!(device.state_vector().await, devices[0].state_vector().await);
    }
    assert_eq!(devices[0].keys().await.unwrap(), vec!["shopping", "todo"]);
    assert!(!devices[2].has("scratch").await.unwrap());
}

#[tokio::test]
async fn reapplying_a_delta_changes_nothing() {
    let key = generate_key();
    let a = synced_with_key("a", key.as_bytes()).await;
    let b = synced_with_key("b", key.as_bytes()).await;
    a.put("x", 1).await.unwrap();
    a.put("y", 2).await.unwrap();

    let delta = a.updates_since(&StateVector::new()).await.unwrap();
    let first = b.apply_update(&delta, None).await.unwrap();
    let snapshot = b.export().await.unwrap();
    let second = b.apply_update(&delta, None).await.unwrap();

    assert_eq!(first.integrated.len(), 2);
    assert!(second.is_noop());
    assert_eq!(b.export().await.unwrap(), snapshot);
}

#[tokio::test]
async fn peer_without_the_key_relays_but_cannot_read() {
    let a = synced_with_key("a", generate_key().as_bytes()).await;
    let relay = synced_with_key("relay", generate_key().as_bytes()).await;
    a.put("secret", "only for a").await.unwrap();

    exchange(&a, &relay).await;
    assert!(relay.has("secret").await.unwrap());
    assert!(matches!(
        relay.get::<String>("secret").await,
        Err(VaultError::AuthenticationFailure)
    ));
    assert_eq!(
        relay.entry("secret").await.unwrap(),
        a.entry("secret").await.unwrap()
    );
}

#[tokio::test]
async fn store_vaults_sync_through_local_peers() {
    let key = generate_key();
    let store_a = VaultStore::open(StoreOptions::default()).await.unwrap();
    let store_b = VaultStore::open(StoreOptions::default()).await.unwrap();
    let a = store_a
        .create_vault("notes", KeySource::raw(key.as_bytes().to_vec()))
        .await
        .unwrap();
    let b = store_b
        .create_vault("notes", KeySource::raw(key.as_bytes().to_vec()))
        .await
        .unwrap();

    a.add_peer(Arc::new(LocalPeer::new(Arc::clone(&b)))).await;
    b.put("from-b", "hi").await.unwrap();
    a.put("from-a", "hello").await.unwrap();

    let report = a.sync_round().await;
    assert_eq!(report.peers_failed, 0);
    assert_eq!(
        b.get::<String>("from-a").await.unwrap().as_deref(),
        Some("hello")
    );
    assert_eq!(
        a.get::<String>("from-b").await.unwrap().as_deref(),
        Some("hi")
    );

    store_a.close().await.unwrap();
    store_b.close().await.unwrap();
}
