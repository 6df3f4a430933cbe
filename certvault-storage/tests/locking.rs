//! Distributed locking through the facade, on a paused clock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certvault_core::LeaseToken;
use certvault_storage::{CertificateStorage, RemoteStore};
use certvault_test_utils::assertions::assert_cancelled;
use certvault_test_utils::fixtures::{
    cancelled_token, encrypted_config, memory_storage, shared_storage,
};
use certvault_test_utils::{init_tracing, StoreOp, VaultError};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const KEY: &str = "issue_cert_example.com";
const LOCK_KEY: &str = "caddytls/issue_cert_example.com.lock";

#[tokio::test(start_paused = true)]
async fn test_lock_is_exclusive_within_a_process() {
    init_tracing();
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    let storage = Arc::new(storage);

    storage.lock(KEY, &CancellationToken::new()).await.expect("lock");

    let contender = Arc::clone(&storage);
    let waiter = tokio::spawn(async move { contender.lock(KEY, &CancellationToken::new()).await });

    // well past one lease duration; the refresher keeps the lease alive
    sleep(Duration::from_millis(900)).await;
    assert!(!waiter.is_finished());

    storage.unlock(KEY).await.expect("unlock");
    waiter
        .await
        .expect("waiter task")
        .expect("waiter acquires after unlock");
    assert!(storage.lock_manager().is_held(KEY).await);
}

#[tokio::test(start_paused = true)]
async fn test_lock_hands_over_between_processes() {
    let (a, store) = memory_storage(encrypted_config()).await.expect("connect");
    let b = Arc::new(shared_storage(encrypted_config(), &store).await.expect("connect"));

    a.lock(KEY, &CancellationToken::new()).await.expect("lock");

    let contender = Arc::clone(&b);
    let waiter = tokio::spawn(async move { contender.lock(KEY, &CancellationToken::new()).await });
    sleep(Duration::from_millis(500)).await;
    assert!(!waiter.is_finished());

    let released_at = Instant::now();
    a.unlock(KEY).await.expect("unlock");
    waiter.await.expect("waiter task").expect("b acquires");
    // within one poll interval of the release
    assert!(released_at.elapsed() <= Duration::from_millis(50));
    assert!(!a.try_lock(KEY).await.expect("try_lock"));
}

#[tokio::test(start_paused = true)]
async fn test_crashed_holder_lease_expires() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");

    // a process obtained the lease and died without refreshing it
    store
        .obtain_lease(LOCK_KEY, &LeaseToken::generate(), Duration::from_millis(300))
        .await
        .expect("obtain");

    let started = Instant::now();
    storage.lock(KEY, &CancellationToken::new()).await.expect("lock");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300));
    assert!(waited <= Duration::from_millis(350));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_wait() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    store
        .obtain_lease(LOCK_KEY, &LeaseToken::generate(), Duration::from_secs(60))
        .await
        .expect("obtain");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = storage.lock(KEY, &cancel).await;
    assert_cancelled(&result);
    assert!(started.elapsed() <= Duration::from_millis(150));
    assert!(result.expect_err("cancelled").is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_lock_on_own_key_obtains_nothing_new() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.lock(KEY, &CancellationToken::new()).await.expect("lock");

    assert_cancelled(&storage.lock(KEY, &cancelled_token()).await);
    assert_eq!(store.calls(StoreOp::ObtainLease), 1);
    assert!(storage.lock_manager().is_held(KEY).await);
}

#[tokio::test(start_paused = true)]
async fn test_stale_registry_entry_recovers_on_next_poll() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.lock(KEY, &CancellationToken::new()).await.expect("lock");
    assert!(store.expire_lease(LOCK_KEY));

    // first attempt clears the stale entry, the next poll re-obtains
    let started = Instant::now();
    storage.lock(KEY, &CancellationToken::new()).await.expect("relock");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(100));
    assert_eq!(storage.lock_metrics().stale_reclaimed, 1);
    assert_eq!(store.calls(StoreOp::ObtainLease), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unlock_without_lock_is_ok() {
    let (storage, _store) = memory_storage(encrypted_config()).await.expect("connect");
    storage.unlock("never-locked").await.expect("noop");
}

#[tokio::test(start_paused = true)]
async fn test_lock_with_timeout_reports_deadline() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    store
        .obtain_lease(LOCK_KEY, &LeaseToken::generate(), Duration::from_secs(60))
        .await
        .expect("obtain");

    let err = storage
        .lock_with_timeout(KEY, Duration::from_millis(200))
        .await
        .expect_err("deadline");
    assert!(err.is_cancelled());
    assert!(matches!(err, VaultError::Lock(_)));
}

#[tokio::test(start_paused = true)]
async fn test_close_releases_leases_for_other_processes() {
    let (a, store) = memory_storage(encrypted_config()).await.expect("connect");
    let b = shared_storage(encrypted_config(), &store).await.expect("connect");

    a.lock(KEY, &CancellationToken::new()).await.expect("lock");
    a.lock("other", &CancellationToken::new()).await.expect("lock");
    assert_eq!(a.close().await, 2);

    assert!(b.try_lock(KEY).await.expect("try_lock"));
    assert!(b.try_lock("other").await.expect("try_lock"));
    assert!(a.lock(KEY, &CancellationToken::new()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_critical_sections_never_overlap() {
    let (first, store) = memory_storage(encrypted_config()).await.expect("connect");
    let second = shared_storage(encrypted_config(), &store).await.expect("connect");
    let facades = [Arc::new(first), Arc::new(second)];

    let inside = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for worker in 0..6 {
        let storage = Arc::clone(&facades[worker % 2]);
        let inside = Arc::clone(&inside);
        let entries = Arc::clone(&entries);
        tasks.push(tokio::spawn(async move {
            for _ in 0..3 {
                storage
                    .lock(KEY, &CancellationToken::new())
                    .await
                    .expect("lock");
                assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                entries.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                inside.store(false, Ordering::SeqCst);
                storage.unlock(KEY).await.expect("unlock");
            }
        }));
    }
    for task in tasks {
        task.await.expect("worker");
    }
    assert_eq!(entries.load(Ordering::SeqCst), 18);
}

#[tokio::test(start_paused = true)]
async fn test_close_ends_pending_lock_waits() {
    let (storage, store) = memory_storage(encrypted_config()).await.expect("connect");
    let storage = Arc::new(storage);
    store
        .obtain_lease(LOCK_KEY, &LeaseToken::generate(), Duration::from_millis(200))
        .await
        .expect("obtain");

    let contender = Arc::clone(&storage);
    let waiter = tokio::spawn(async move { contender.lock(KEY, &CancellationToken::new()).await });
    sleep(Duration::from_millis(60)).await;

    assert_eq!(storage.close().await, 0);
    assert_cancelled(&waiter.await.expect("waiter task"));
    let attempts = store.calls(StoreOp::ObtainLease);

    // the foreign lease lapses; nobody picks the key up after close
    sleep(Duration::from_millis(500)).await;
    assert!(store.raw(LOCK_KEY).is_none());
    assert_eq!(store.calls(StoreOp::ObtainLease), attempts);
    assert!(!storage.lock_manager().is_held(KEY).await);
}
