//! In-process remote store.
//!
//! Shares one keyspace between every facade holding the same
//! `Arc<InMemoryRemoteStore>`, which is how tests model several processes
//! pointing at one server. Expiry runs on tokio's clock so paused-time tests
//! can fast-forward through lease lifetimes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use certvault_core::{LeaseToken, RemoteStoreError};
use tokio::time::Instant;

use super::{page_of, RemoteResult, RemoteStore, ScanPage, StoreOp};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory [`RemoteStore`] with fault injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    /// Pending injected failures per operation.
    faults: Mutex<HashMap<StoreOp, u32>>,
    /// Calls seen per operation, including failed ones.
    calls: Mutex<HashMap<StoreOp, u64>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with a backend error.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults.entry(op).or_insert(0) += times;
        }
    }

    /// Number of calls seen for `op`.
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Force a lease to expire now, as if its owner had stopped refreshing.
    ///
    /// Returns false when no such key exists.
    pub fn expire_lease(&self, key: &str) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// All live keys, in order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| entry.is_live(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw stored bytes for a live key, bypassing fault injection.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.entries.read().ok().and_then(|entries| {
            entries
                .get(key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.clone())
        })
    }

    /// Overwrite raw bytes for a key, bypassing fault injection.
    pub fn put_raw(&self, key: &str, value: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: None,
                },
            );
        }
    }

    /// Count the call and fail it if a fault is pending.
    fn enter(&self, op: StoreOp) -> RemoteResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| RemoteStoreError::backend(op.as_str(), "fault table poisoned"))?;
        match faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(RemoteStoreError::backend(op.as_str(), "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn read(
        &self,
        op: StoreOp,
    ) -> RemoteResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| RemoteStoreError::backend(op.as_str(), "lock poisoned"))
    }

    fn write(
        &self,
        op: StoreOp,
    ) -> RemoteResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| RemoteStoreError::backend(op.as_str(), "lock poisoned"))
    }
}

/// Whether `entry` is a live lease held under `token`.
fn held_by(entry: Option<&Entry>, token: &LeaseToken, now: Instant) -> bool {
    entry.is_some_and(|entry| entry.is_live(now) && entry.value == token.as_bytes())
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn ping(&self) -> RemoteResult<()> {
        self.enter(StoreOp::Ping)
    }

    async fn get(&self, key: &str) -> RemoteResult<Vec<u8>> {
        self.enter(StoreOp::Get)?;
        let now = Instant::now();
        let entries = self.read(StoreOp::Get)?;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| RemoteStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn set(&self, key: &str, value: &[u8]) -> RemoteResult<()> {
        self.enter(StoreOp::Set)?;
        let mut entries = self.write(StoreOp::Set)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        self.enter(StoreOp::Delete)?;
        let mut entries = self.write(StoreOp::Delete)?;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> RemoteResult<bool> {
        self.enter(StoreOp::Exists)?;
        let now = Instant::now();
        let entries = self.read(StoreOp::Exists)?;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RemoteResult<ScanPage> {
        self.enter(StoreOp::Scan)?;
        let now = Instant::now();
        let entries = self.read(StoreOp::Scan)?;
        Ok(page_of(
            entries.keys().map(String::as_str),
            cursor,
            pattern,
            count,
            |key| entries.get(key).is_some_and(|entry| entry.is_live(now)),
        ))
    }

    async fn obtain_lease(&self, key: &str, token: &LeaseToken, ttl: Duration) -> RemoteResult<()> {
        self.enter(StoreOp::ObtainLease)?;
        let now = Instant::now();
        let mut entries = self.write(StoreOp::ObtainLease)?;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Err(RemoteStoreError::LeaseNotObtained {
                key: key.to_string(),
            });
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: token.as_bytes().to_vec(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn lease_ttl(&self, key: &str, token: &LeaseToken) -> RemoteResult<Duration> {
        self.enter(StoreOp::LeaseTtl)?;
        let now = Instant::now();
        let entries = self.read(StoreOp::LeaseTtl)?;
        let entry = entries.get(key);
        if !held_by(entry, token, now) {
            return Ok(Duration::ZERO);
        }
        Ok(entry
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO))
    }

    async fn refresh_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> RemoteResult<()> {
        self.enter(StoreOp::RefreshLease)?;
        let now = Instant::now();
        let mut entries = self.write(StoreOp::RefreshLease)?;
        if !held_by(entries.get(key), token, now) {
            return Err(RemoteStoreError::LeaseNotHeld {
                key: key.to_string(),
            });
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn release_lease(&self, key: &str, token: &LeaseToken) -> RemoteResult<()> {
        self.enter(StoreOp::ReleaseLease)?;
        let now = Instant::now();
        let mut entries = self.write(StoreOp::ReleaseLease)?;
        if !held_by(entries.get(key), token, now) {
            return Err(RemoteStoreError::LeaseNotHeld {
                key: key.to_string(),
            });
        }
        entries.remove(key);
        Ok(())
    }
}
