//! Remote store adapter with per-operation deadlines.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use certvault_core::{LeaseToken, RemoteStoreError};

use crate::remote::{RemoteResult, RemoteStore, ScanPage, StoreOp};

/// Shared handle to a [`RemoteStore`] that bounds every call by a timeout.
///
/// Cloning is cheap; the facade, the listing engine and the lock manager
/// each hold one.
pub struct StoreAdapter<S: RemoteStore> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: RemoteStore> Clone for StoreAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: RemoteStore> std::fmt::Debug for StoreAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> StoreAdapter<S> {
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, op: StoreOp, call: F) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteStoreError::Timeout {
                operation: op.as_str().to_string(),
                timeout: self.timeout,
            }),
        }
    }

    pub async fn ping(&self) -> RemoteResult<()> {
        self.bounded(StoreOp::Ping, self.store.ping()).await
    }

    pub async fn get(&self, key: &str) -> RemoteResult<Vec<u8>> {
        self.bounded(StoreOp::Get, self.store.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &[u8]) -> RemoteResult<()> {
        self.bounded(StoreOp::Set, self.store.set(key, value)).await
    }

    pub async fn delete(&self, key: &str) -> RemoteResult<()> {
        self.bounded(StoreOp::Delete, self.store.delete(key)).await
    }

    pub async fn exists(&self, key: &str) -> RemoteResult<bool> {
        self.bounded(StoreOp::Exists, self.store.exists(key)).await
    }

    pub async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RemoteResult<ScanPage> {
        self.bounded(StoreOp::Scan, self.store.scan(cursor, pattern, count))
            .await
    }

    pub async fn obtain_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> RemoteResult<()> {
        self.bounded(StoreOp::ObtainLease, self.store.obtain_lease(key, token, ttl))
            .await
    }

    pub async fn lease_ttl(&self, key: &str, token: &LeaseToken) -> RemoteResult<Duration> {
        self.bounded(StoreOp::LeaseTtl, self.store.lease_ttl(key, token))
            .await
    }

    pub async fn refresh_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> RemoteResult<()> {
        self.bounded(StoreOp::RefreshLease, self.store.refresh_lease(key, token, ttl))
            .await
    }

    pub async fn release_lease(&self, key: &str, token: &LeaseToken) -> RemoteResult<()> {
        self.bounded(StoreOp::ReleaseLease, self.store.release_lease(key, token))
            .await
    }
}
