//! Store / Load / Delete / Exists / Stat through the facade.

use certvault_storage::CertificateStorage;
use certvault_test_utils::assertions::{assert_decode_failure, assert_invalid_key, assert_not_found};
use certvault_test_utils::fixtures::{
    encrypted_config, memory_storage, plaintext_config, shared_storage,
};
use certvault_test_utils::generators::{arb_logical_key, arb_valid_config, arb_value};
use certvault_test_utils::{init_tracing, StorageConfig};
use chrono::Utc;
use proptest::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn test_store_then_load_round_trips() {
    init_tracing();
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");

    storage
        .store("acme/example.com/example.com.crt", b"-----BEGIN CERTIFICATE-----")
        .await
        .expect("store");
    let loaded = storage
        .load("acme/example.com/example.com.crt")
        .await
        .expect("load");
    assert_eq!(loaded, b"-----BEGIN CERTIFICATE-----");
}

#[tokio::test]
async fn test_plaintext_mode_round_trips() {
    let (storage, store) = memory_storage(plaintext_config()).await.expect("connect");
    storage.store("a/b", b"plain").await.expect("store");

    let raw = store.raw("caddytls/a/b").expect("stored under prefix");
    let json: serde_json::Value = serde_json::from_slice(&raw).expect("plaintext envelope is JSON");
    assert!(json.get("value").is_some());
    assert!(json.get("modified").is_some());
    assert_eq!(storage.load("a/b").await.expect("load"), b"plain");
}

#[tokio::test]
async fn test_missing_key_is_not_found_everywhere() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    assert_not_found(&storage.load("missing").await);
    assert_not_found(&storage.stat("missing").await);
    assert_not_found(&storage.delete("missing").await);
    assert!(!storage.exists("missing").await);
}

#[tokio::test]
async fn test_delete_then_load_is_not_found() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");

    assert!(!storage.exists("k").await);
    storage.store("k", b"v").await.expect("store");
    assert!(storage.exists("k").await);

    storage.delete("k").await.expect("delete");
    assert!(!storage.exists("k").await);
    assert_not_found(&storage.load("k").await);
    assert_not_found(&storage.delete("k").await);
}

#[tokio::test]
async fn test_overwrite_replaces_value() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.store("k", b"first").await.expect("store");
    storage.store("k", b"second").await.expect("store");
    assert_eq!(storage.load("k").await.expect("load"), b"second");
}

#[tokio::test]
async fn test_restoring_same_value_only_moves_modified() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.store("k", b"same").await.expect("store");
    let first = storage.stat("k").await.expect("stat");
    tokio::time::sleep(Duration::from_millis(5)).await;
    storage.store("k", b"same").await.expect("store");
    let second = storage.stat("k").await.expect("stat");

    assert!(second.modified > first.modified);
    assert_eq!(second.size, first.size);
    assert_eq!(storage.load("k").await.expect("load"), b"same");
}

#[tokio::test]
async fn test_stat_reports_size_and_write_time() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");

    let before = Utc::now();
    storage.store("acme/site/key", b"0123456789").await.expect("store");
    let after = Utc::now();

    let info = storage.stat("acme/site/key").await.expect("stat");
    assert_eq!(info.key, "acme/site/key");
    assert_eq!(info.size, 10);
    assert!(!info.is_terminal);
    assert!(info.modified >= before && info.modified <= after);
}

#[tokio::test]
async fn test_empty_value_is_stored() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.store("empty", b"").await.expect("store");
    assert!(storage.load("empty").await.expect("load").is_empty());
    assert_eq!(storage.stat("empty").await.expect("stat").size, 0);
}

#[tokio::test]
async fn test_wrong_key_is_a_decode_failure_not_absence() {
    let (writer, store) = memory_storage(encrypted_config()).await.expect("connect");
    writer.store("k", b"secret").await.expect("store");

    let other_key = StorageConfig {
        aes_key: "fedcba9876543210fedcba9876543210".to_string(),
        ..StorageConfig::default()
    };
    let reader = shared_storage(other_key, &store).await.expect("connect");

    assert_decode_failure(&reader.load("k").await);
    assert_decode_failure(&reader.stat("k").await);
    assert!(!reader.exists("k").await);
}

#[tokio::test]
async fn test_prefixes_isolate_namespaces() {
    let (a, store) = memory_storage(encrypted_config()).await.expect("connect");
    let b = shared_storage(
        StorageConfig {
            key_prefix: "tenant-b".to_string(),
            ..encrypted_config()
        },
        &store,
    )
    .await
    .expect("connect");

    a.store("shared/name", b"from a").await.expect("store");
    assert_not_found(&b.load("shared/name").await);
    b.store("shared/name", b"from b").await.expect("store");

    assert_eq!(a.load("shared/name").await.expect("load"), b"from a");
    assert_eq!(b.load("shared/name").await.expect("load"), b"from b");
    assert!(store.raw("tenant-b/shared/name").is_some());
}

#[tokio::test]
async fn test_equivalent_spellings_address_one_key() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.store("/acme//site/", b"v").await.expect("store");
    assert_eq!(storage.load("acme/site").await.expect("load"), b"v");
    // traversal cannot escape the namespace
    storage.store("../../escape", b"w").await.expect("store");
    assert_eq!(storage.load("escape").await.expect("load"), b"w");
}

#[tokio::test]
async fn test_lease_suffix_keys_are_rejected() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    assert_invalid_key(&storage.store("issue_cert.lock", b"v").await);
    assert_invalid_key(&storage.load("issue_cert.lock").await);
    assert_invalid_key(&storage.store("", b"v").await);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: whatever is stored under a key loads back unchanged.
    #[test]
    fn prop_store_load_round_trip(key in arb_logical_key(), value in arb_value()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let loaded = runtime.block_on(async {
            let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
            storage.store(&key, &value).await.expect("store");
            storage.load(&key).await.expect("load")
        });
        prop_assert_eq!(loaded, value);
    }

    /// Property: every valid configuration connects and round-trips values.
    #[test]
    fn prop_any_valid_config_round_trips(config in arb_valid_config(), value in arb_value()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let (loaded, listed) = runtime.block_on(async {
            let (storage, _store) = memory_storage(config).await.expect("connect");
            storage.store("acme/site/cert", &value).await.expect("store");
            let loaded = storage.load("acme/site/cert").await.expect("load");
            let listed = storage.list("acme", true).await.expect("list");
            (loaded, listed)
        });
        prop_assert_eq!(loaded, value);
        prop_assert_eq!(listed, vec!["acme/site/cert".to_string()]);
    }
}

#[tokio::test]
async fn test_facades_share_one_store() {
    let (a, store) = memory_storage(encrypted_config()).await.expect("connect");
    let b = shared_storage(encrypted_config(), &store).await.expect("connect");
    a.store("k", b"v").await.expect("store");
    assert_eq!(b.load("k").await.expect("load"), b"v");
    b.delete("k").await.expect("delete");
    assert!(!a.exists("k").await);
    assert!(store.keys().is_empty());
}
