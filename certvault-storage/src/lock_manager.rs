//! Distributed lock manager.
//!
//! Locks are leases in the remote store. A process that obtains a lease
//! records it in a local registry and spawns a refresher task that keeps the
//! lease alive until `unlock` removes the registry entry. If the process dies,
//! refreshing stops and the lease expires on its own after the lease duration.
//!
//! # Registry
//!
//! The registry maps each physical lease key to a slot guarded by an async
//! mutex. Every acquisition, refresh and release for a key runs with its slot
//! locked, so operations on one key are serialized while different keys
//! proceed independently. A slot holding `None` means the key is not held.
//!
//! # Stale entries
//!
//! A registry entry whose remote lease has expired (for example because the
//! refresher failed) is detected on the next acquisition attempt: the entry
//! is cleared and that attempt reports "not obtained", so the lease is
//! re-obtained on the following poll.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certvault_core::{
    Held, Lease, LeasePhase, LeaseToken, LockConfig, LockError, RemoteStoreError,
};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adapter::StoreAdapter;
use crate::keys::KeyCodec;
use crate::remote::RemoteStore;

type Slot = Arc<Mutex<Option<Lease<Held>>>>;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for lock activity since the manager was created.
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Leases obtained from the remote store
    pub acquired: AtomicU64,

    /// Acquisition attempts that found the lease held
    pub contended: AtomicU64,

    /// Registry entries cleared because their remote lease had expired
    pub stale_reclaimed: AtomicU64,

    /// Successful background refreshes
    pub refreshed: AtomicU64,

    /// Background refreshes that failed and stopped their refresher
    pub refresh_failures: AtomicU64,

    /// Leases released on unlock or shutdown
    pub released: AtomicU64,

    /// Remote releases that failed (the registry entry is dropped anyway)
    pub release_failures: AtomicU64,

    /// Lock waits abandoned through cancellation or deadline
    pub abandoned_waits: AtomicU64,
}

impl LockMetrics {
    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            stale_reclaimed: self.stale_reclaimed.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            abandoned_waits: self.abandoned_waits.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of lock metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockMetricsSnapshot {
    pub acquired: u64,
    pub contended: u64,
    pub stale_reclaimed: u64,
    pub refreshed: u64,
    pub refresh_failures: u64,
    pub released: u64,
    pub release_failures: u64,
    pub abandoned_waits: u64,
}

// ============================================================================
// LOCK MANAGER
// ============================================================================

/// Lease-backed lock manager shared by every clone.
pub struct LockManager<S: RemoteStore> {
    inner: Arc<Inner<S>>,
}

impl<S: RemoteStore> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: RemoteStore> {
    adapter: StoreAdapter<S>,
    codec: KeyCodec,
    config: LockConfig,
    registry: DashMap<String, Slot>,
    metrics: LockMetrics,
    /// Cancelled on shutdown; stops every refresher.
    shutdown: CancellationToken,
}

enum RefreshOutcome {
    Refreshed,
    /// Unlocked, reclaimed or replaced by a newer lease.
    Gone,
    Failed {
        error: RemoteStoreError,
        /// Local estimate of how long the remote lease has left.
        expires_in: Option<Duration>,
    },
}

impl<S: RemoteStore> LockManager<S> {
    pub fn new(adapter: StoreAdapter<S>, codec: KeyCodec, config: LockConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                codec,
                config,
                registry: DashMap::new(),
                metrics: LockMetrics::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Make a single acquisition attempt.
    ///
    /// Returns `Ok(false)` when the lease is held, including by this process.
    pub async fn try_lock(&self, key: &str) -> Result<bool, LockError> {
        match self.try_acquire(key).await {
            Ok(()) => Ok(true),
            Err(LockError::NotObtained { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Block until the lock for `key` is obtained or `cancel` fires.
    ///
    /// Polls every `poll_interval` while the lease is held elsewhere.
    /// Cancellation is observed between attempts, never in the middle of one.
    pub async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<(), LockError> {
        self.acquire_until(key, cancel, None).await
    }

    /// Like [`LockManager::lock`] but gives up after `timeout`.
    pub async fn lock_with_timeout(&self, key: &str, timeout: Duration) -> Result<(), LockError> {
        let never = CancellationToken::new();
        self.acquire_until(key, &never, Some(Instant::now() + timeout))
            .await
    }

    /// Release the lock for `key`.
    ///
    /// Unlocking a key this process does not hold is a no-op. The registry
    /// entry is removed even when the remote release fails; the failure is
    /// still reported.
    pub async fn unlock(&self, key: &str) -> Result<(), LockError> {
        let inner = &self.inner;
        let lock_key = inner.codec.lock_key(key);

        let Some(slot) = inner.existing_slot(&lock_key) else {
            tracing::debug!(key = %key, phase = %LeasePhase::Unheld, "Unlock of a key that is not held");
            return Ok(());
        };

        let result = {
            let mut held = slot.lock().await;
            match held.take() {
                None => Ok(()),
                Some(lease) => {
                    let data = lease.release();
                    match inner.adapter.release_lease(&data.lock_key, &data.token).await {
                        Ok(()) => {
                            LockMetrics::bump(&inner.metrics.released);
                            tracing::debug!(
                                key = %key,
                                lock_key = %data.lock_key,
                                phase = %LeasePhase::Released,
                                "Lease released"
                            );
                            Ok(())
                        }
                        Err(e) => {
                            LockMetrics::bump(&inner.metrics.release_failures);
                            tracing::warn!(
                                key = %key,
                                lock_key = %data.lock_key,
                                error = %e,
                                "Remote release failed; lease will expire on its own"
                            );
                            Err(LockError::Release {
                                key: key.to_string(),
                                reason: e.to_string(),
                            })
                        }
                    }
                }
            }
        };

        drop(slot);
        inner.prune(&lock_key);
        result
    }

    /// Whether this process currently believes it holds `key`.
    pub async fn is_held(&self, key: &str) -> bool {
        let lock_key = self.inner.codec.lock_key(key);
        match self.inner.existing_slot(&lock_key) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Logical keys of every lease this process holds.
    pub async fn held_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for slot in self.inner.all_slots() {
            if let Some(lease) = slot.lock().await.as_ref() {
                keys.push(lease.logical_key().to_string());
            }
        }
        keys.sort();
        keys
    }

    /// Stop every refresher and release every held lease.
    ///
    /// Returns the number of leases released remotely. Release failures are
    /// logged and the leases left to expire.
    pub async fn shutdown(&self) -> usize {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let mut released = 0;
        for slot in inner.all_slots() {
            let Some(lease) = slot.lock().await.take() else {
                continue;
            };
            let data = lease.release();
            match inner.adapter.release_lease(&data.lock_key, &data.token).await {
                Ok(()) => {
                    LockMetrics::bump(&inner.metrics.released);
                    released += 1;
                }
                Err(e) => {
                    LockMetrics::bump(&inner.metrics.release_failures);
                    tracing::warn!(
                        lock_key = %data.lock_key,
                        error = %e,
                        "Failed to release lease during shutdown"
                    );
                }
            }
        }
        inner.registry.clear();

        tracing::info!(released = released, "Lock manager shut down");
        released
    }

    async fn acquire_until(
        &self,
        key: &str,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), LockError> {
        let started = Instant::now();
        loop {
            match self.try_acquire(key).await {
                Ok(()) => return Ok(()),
                Err(LockError::NotObtained { .. }) => {}
                Err(e) => return Err(e),
            }

            let expired = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    LockMetrics::bump(&self.inner.metrics.abandoned_waits);
                    tracing::debug!(key = %key, "Lock wait cancelled");
                    return Err(LockError::Cancelled { key: key.to_string() });
                }

                _ = self.inner.shutdown.cancelled() => {
                    LockMetrics::bump(&self.inner.metrics.abandoned_waits);
                    tracing::debug!(key = %key, "Lock wait ended by shutdown");
                    return Err(LockError::Cancelled { key: key.to_string() });
                }

                _ = expired => {
                    LockMetrics::bump(&self.inner.metrics.abandoned_waits);
                    let waited = started.elapsed();
                    tracing::debug!(key = %key, waited_ms = waited.as_millis() as u64, "Lock wait exceeded deadline");
                    return Err(LockError::DeadlineExceeded { key: key.to_string(), waited });
                }

                _ = sleep(self.inner.config.poll_interval) => {}
            }
        }
    }

    /// One acquisition attempt. `NotObtained` means "try again later".
    ///
    /// A failed attempt never leaves an empty registry slot behind.
    async fn try_acquire(&self, key: &str) -> Result<(), LockError> {
        let inner = &self.inner;
        let lock_key = inner.codec.lock_key(key);
        let slot = inner.slot(&lock_key);

        let result = self.attempt(key, &lock_key, &slot).await;
        if result.is_err() {
            drop(slot);
            inner.prune(&lock_key);
        }
        result
    }

    async fn attempt(&self, key: &str, lock_key: &str, slot: &Slot) -> Result<(), LockError> {
        let inner = &self.inner;
        let mut held = slot.lock().await;

        // Checked with the slot locked: a shutdown that starts later still
        // finds this slot and releases whatever it ends up holding.
        if inner.shutdown.is_cancelled() {
            return Err(LockError::Cancelled {
                key: key.to_string(),
            });
        }

        let registered = held.as_ref().map(|lease| lease.token().clone());
        if let Some(token) = registered {
            let ttl = inner
                .adapter
                .lease_ttl(lock_key, &token)
                .await
                .map_err(|e| remote_failure(key, e))?;

            if !ttl.is_zero() {
                LockMetrics::bump(&inner.metrics.contended);
                return Err(not_obtained(key));
            }

            tracing::warn!(
                key = %key,
                lock_key = %lock_key,
                phase = %LeasePhase::StaleDetected,
                "Registered lease has expired remotely; clearing it"
            );
            if let Err(e) = inner.adapter.release_lease(lock_key, &token).await {
                tracing::debug!(lock_key = %lock_key, error = %e, "Best-effort release of stale lease failed");
            }
            held.take();
            LockMetrics::bump(&inner.metrics.stale_reclaimed);
            return Err(not_obtained(key));
        }

        tracing::trace!(key = %key, lock_key = %lock_key, phase = %LeasePhase::Acquiring, "Obtaining lease");
        let token = LeaseToken::generate();
        let duration = inner.config.lease_duration;
        match inner.adapter.obtain_lease(lock_key, &token, duration).await {
            Ok(()) => {
                *held = Some(Lease::obtained(
                    key,
                    lock_key,
                    token.clone(),
                    Utc::now(),
                    duration,
                ));
                drop(held);
                LockMetrics::bump(&inner.metrics.acquired);
                tracing::debug!(
                    key = %key,
                    lock_key = %lock_key,
                    phase = %LeasePhase::Held,
                    lease_ms = duration.as_millis() as u64,
                    "Lease obtained"
                );
                self.spawn_refresher(lock_key.to_string(), token);
                Ok(())
            }
            Err(RemoteStoreError::LeaseNotObtained { .. }) => {
                LockMetrics::bump(&inner.metrics.contended);
                Err(not_obtained(key))
            }
            Err(e) => Err(remote_failure(key, e)),
        }
    }

    fn spawn_refresher(&self, lock_key: String, token: LeaseToken) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let refresher = AssertUnwindSafe(refresh_loop(inner, lock_key.clone(), token));
            if let Err(panic) = refresher.catch_unwind().await {
                tracing::error!(
                    lock_key = %lock_key,
                    panic = %panic_message(panic.as_ref()),
                    "Lease refresher panicked"
                );
            }
        });
    }
}

impl<S: RemoteStore> Inner<S> {
    /// Slot for `lock_key`, created if missing.
    fn slot(&self, lock_key: &str) -> Slot {
        Arc::clone(self.registry.entry(lock_key.to_string()).or_default().value())
    }

    fn existing_slot(&self, lock_key: &str) -> Option<Slot> {
        self.registry.get(lock_key).map(|entry| Arc::clone(entry.value()))
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.registry
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop an empty slot nobody else references.
    ///
    /// Clones are only taken under the shard lock `remove_if` holds, so a
    /// strong count of one cannot grow while the predicate runs.
    fn prune(&self, lock_key: &str) {
        self.registry.remove_if(lock_key, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|held| held.is_none())
        });
    }

    async fn refresh_once(&self, lock_key: &str, token: &LeaseToken) -> RefreshOutcome {
        let Some(slot) = self.existing_slot(lock_key) else {
            return RefreshOutcome::Gone;
        };
        let mut held = slot.lock().await;
        let Some(lease) = held.as_mut().filter(|lease| lease.is_owned_by(token)) else {
            return RefreshOutcome::Gone;
        };

        let duration = self.config.lease_duration;
        match self.adapter.refresh_lease(lock_key, token, duration).await {
            Ok(()) => {
                lease.mark_refreshed(Utc::now(), duration);
                LockMetrics::bump(&self.metrics.refreshed);
                tracing::trace!(lock_key = %lock_key, "Lease refreshed");
                RefreshOutcome::Refreshed
            }
            Err(error) => {
                LockMetrics::bump(&self.metrics.refresh_failures);
                RefreshOutcome::Failed {
                    error,
                    expires_in: lease.data().remaining_duration(Utc::now()),
                }
            }
        }
    }
}

/// Keep one lease fresh until it is unlocked, replaced or refreshing fails.
///
/// A failed refresh ends the task without touching the registry; the next
/// acquisition attempt notices the expired lease and clears the entry.
async fn refresh_loop<S: RemoteStore>(inner: Arc<Inner<S>>, lock_key: String, token: LeaseToken) {
    let period = inner.config.refresh_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = inner.shutdown.cancelled() => return,

            _ = ticker.tick() => {}
        }

        match inner.refresh_once(&lock_key, &token).await {
            RefreshOutcome::Refreshed => {}
            RefreshOutcome::Gone => {
                tracing::trace!(lock_key = %lock_key, "Lease no longer registered; refresher exiting");
                return;
            }
            RefreshOutcome::Failed { error, expires_in } => {
                tracing::error!(
                    lock_key = %lock_key,
                    phase = %LeasePhase::RefreshFailed,
                    error = %error,
                    expires_in_ms = expires_in.map_or(0, |d| d.as_millis() as u64),
                    "Failed to refresh lease; refresher exiting"
                );
                return;
            }
        }
    }
}

fn not_obtained(key: &str) -> LockError {
    LockError::NotObtained {
        key: key.to_string(),
    }
}

fn remote_failure(key: &str, e: RemoteStoreError) -> LockError {
    LockError::Remote {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
