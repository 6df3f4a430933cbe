//! List behaviour through the facade.

use certvault_storage::CertificateStorage;
use certvault_test_utils::fixtures::{encrypted_config, memory_storage, shared_storage};
use certvault_test_utils::{StorageConfig, StoreOp};
use tokio_util::sync::CancellationToken;

async fn seeded(keys: &[&str]) -> (
    certvault_storage::CertStorage<certvault_test_utils::InMemoryRemoteStore>,
    std::sync::Arc<certvault_test_utils::InMemoryRemoteStore>,
) {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    for key in keys {
        storage.store(key, b"v").await.expect("store");
    }
    (storage, store)
}

#[tokio::test]
async fn test_recursive_listing_returns_every_descendant() {
    let (storage, _store) = seeded(&[
        "acme/example.com/example.com.crt",
        "acme/example.com/example.com.key",
        "acme/example.org/example.org.crt",
        "ocsp/example.com",
    ])
    .await;

    let listed = storage.list("acme", true).await.expect("list");
    assert_eq!(
        listed,
        vec![
            "acme/example.com/example.com.crt",
            "acme/example.com/example.com.key",
            "acme/example.org/example.org.crt",
        ]
    );
}

#[tokio::test]
async fn test_non_recursive_listing_collapses_to_children() {
    let (storage, _store) = seeded(&[
        "acme/example.com/example.com.crt",
        "acme/example.com/example.com.key",
        "acme/example.org/example.org.crt",
        "acme/README",
    ])
    .await;

    let listed = storage.list("acme", false).await.expect("list");
    assert_eq!(listed, vec!["acme/README", "acme/example.com", "acme/example.org"]);
}

#[tokio::test]
async fn test_one_level_and_full_listing_of_same_tree() {
    let (storage, _store) = seeded(&["a/b", "a/c", "a/d/e"]).await;
    assert_eq!(storage.list("a", false).await.expect("list"), vec!["a/b", "a/c", "a/d"]);
    assert_eq!(storage.list("a", true).await.expect("list"), vec!["a/b", "a/c", "a/d/e"]);
    assert_eq!(storage.list("", true).await.expect("list"), vec!["a/b", "a/c", "a/d/e"]);
}

#[tokio::test]
async fn test_wildcard_and_blank_list_everything_flat() {
    let (storage, _store) = seeded(&["a/b/c", "d"]).await;
    for prefix in ["*", "", "   "] {
        let listed = storage.list(prefix, false).await.expect("list");
        assert_eq!(listed, vec!["a/b/c", "d"], "prefix {:?}", prefix);
    }
}

#[tokio::test]
async fn test_sibling_with_shared_name_prefix_is_excluded() {
    let (storage, _store) = seeded(&["acme/x", "acme-staging/y"]).await;
    assert_eq!(storage.list("acme", true).await.expect("list"), vec!["acme/x"]);
}

#[tokio::test]
async fn test_listing_spans_many_scan_pages() {
    let keys: Vec<String> = (0..25).map(|i| format!("certs/site{:02}", i)).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let (storage, store) = seeded(&refs).await;

    let scans_before = store.calls(StoreOp::Scan);
    let listed = storage.list("certs", true).await.expect("list");
    assert_eq!(listed, keys);
    // three keys per page
    assert!(store.calls(StoreOp::Scan) - scans_before >= 9);
}

#[tokio::test]
async fn test_held_locks_are_not_listed() {
    let (storage, _store) = seeded(&["acme/example.com/cert"]).await;
    storage
        .lock("acme/example.com/cert", &CancellationToken::new())
        .await
        .expect("lock");

    let listed = storage.list("acme", true).await.expect("list");
    assert_eq!(listed, vec!["acme/example.com/cert"]);
    storage.unlock("acme/example.com/cert").await.expect("unlock");
}

#[tokio::test]
async fn test_listing_stays_inside_namespace() {
    let (a, store) = seeded(&["acme/a"]).await;
    let b = shared_storage(
        StorageConfig {
            key_prefix: "other".to_string(),
            ..encrypted_config()
        },
        &store,
    )
    .await
    .expect("connect");
    b.store("acme/b", b"v").await.expect("store");

    assert_eq!(a.list("*", true).await.expect("list"), vec!["acme/a"]);
    assert_eq!(b.list("*", true).await.expect("list"), vec!["acme/b"]);
}

#[tokio::test]
async fn test_glob_metacharacters_in_prefix_are_literal() {
    let (storage, _store) = seeded(&["wild/*.example.com/cert", "wild/www.example.com/cert"]).await;
    let listed = storage.list("wild/*.example.com", true).await.expect("list");
    assert_eq!(listed, vec!["wild/*.example.com/cert"]);
}

#[tokio::test]
async fn test_scan_failure_surfaces_list_error() {
    let (storage, store) = seeded(&["a/b"]).await;
    store.fail_next(StoreOp::Scan, 1);
    let err = storage.list("a", true).await.expect_err("scan fails");
    assert!(!err.is_not_found());
    assert!(err.to_string().contains("Unable to list keys"));
}
