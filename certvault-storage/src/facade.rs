//! Certificate storage facade.
//!
//! Ties the key codec, the envelope codec, the listing engine and the lock
//! manager to one remote store and exposes them as [`CertificateStorage`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certvault_core::{
    CodecError, ConfigError, KeyInfo, LockConfig, RemoteStoreError, StorageConfig, StorageError,
    VaultError, VaultResult,
};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::adapter::StoreAdapter;
use crate::envelope::{EnvelopeCodec, StoredEnvelope};
use crate::keys::KeyCodec;
use crate::listing::ListingEngine;
use crate::lock_manager::{LockManager, LockMetricsSnapshot};
use crate::remote::RemoteStore;
use crate::traits::CertificateStorage;

/// Encrypted, namespaced certificate storage on a shared remote store.
///
/// Built by [`CertStorage::connect`] and usable until [`CertStorage::close`];
/// afterwards every operation fails with `StorageError::NotReady`.
pub struct CertStorage<S: RemoteStore> {
    config: StorageConfig,
    codec: KeyCodec,
    envelope: EnvelopeCodec,
    adapter: StoreAdapter<S>,
    listing: ListingEngine<S>,
    locks: LockManager<S>,
    ready: AtomicBool,
}

impl<S: RemoteStore> std::fmt::Debug for CertStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStorage")
            .field("config", &self.config)
            .field("prefix", &self.codec.prefix())
            .field("envelope", &self.envelope)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore> CertStorage<S> {
    /// Validate the configuration, check connectivity and return a ready
    /// facade.
    pub async fn connect(
        config: StorageConfig,
        lock_config: LockConfig,
        store: Arc<S>,
    ) -> VaultResult<Self> {
        config.validate()?;
        lock_config.validate()?;

        let envelope =
            EnvelopeCodec::new(config.aes_key_bytes()).map_err(|e| ConfigError::InvalidValue {
                field: "aes_key".to_string(),
                value: "[REDACTED]".to_string(),
                reason: e.to_string(),
            })?;

        let adapter = StoreAdapter::new(store, config.operation_timeout());
        adapter.ping().await?;

        let codec = KeyCodec::new(&config.key_prefix);
        let listing = ListingEngine::new(adapter.clone(), codec.clone(), lock_config.scan_count);
        let locks = LockManager::new(adapter.clone(), codec.clone(), lock_config);

        tracing::info!(
            address = %config.resolved_address(),
            key_prefix = %codec.prefix(),
            encrypted = envelope.is_encrypted(),
            "Certificate storage connected"
        );

        Ok(Self {
            config,
            codec,
            envelope,
            adapter,
            listing,
            locks,
            ready: AtomicBool::new(true),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn key_codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn lock_manager(&self) -> &LockManager<S> {
        &self.locks
    }

    pub fn lock_metrics(&self) -> LockMetricsSnapshot {
        self.locks.metrics()
    }

    /// Stop all refreshers and release every held lease.
    ///
    /// Returns the number of leases released. Closing twice is a no-op.
    pub async fn close(&self) -> usize {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return 0;
        }
        let released = self.locks.shutdown().await;
        tracing::info!(released = released, "Certificate storage closed");
        released
    }

    /// One lock attempt without waiting. `Ok(false)` means the lock is held.
    pub async fn try_lock(&self, key: &str) -> VaultResult<bool> {
        self.ensure_ready()?;
        Ok(self.locks.try_lock(key).await?)
    }

    /// Acquire the lock for `key`, giving up after `timeout`.
    pub async fn lock_with_timeout(&self, key: &str, timeout: Duration) -> VaultResult<()> {
        self.ensure_ready()?;
        Ok(self.locks.lock_with_timeout(key, timeout).await?)
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StorageError::NotReady)
        }
    }

    /// Fetch the stored bytes for `key` without decoding them.
    async fn fetch_raw(&self, key: &str) -> VaultResult<Vec<u8>> {
        self.ensure_ready()?;
        KeyCodec::validate_data_key(key)?;

        match self.adapter.get(&self.codec.to_physical(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(RemoteStoreError::NotFound { .. }) => Err(StorageError::NotFound {
                key: key.to_string(),
            }
            .into()),
            Err(e) => Err(VaultError::Remote(e)),
        }
    }

    /// Fetch and decode the envelope for `key`.
    async fn fetch_envelope(&self, key: &str) -> VaultResult<StoredEnvelope> {
        let bytes = self.fetch_raw(key).await?;
        self.envelope.decode(&bytes).map_err(|source| {
            tracing::debug!(key = %key, error = %source, "Stored value could not be decoded");
            StorageError::Decode {
                key: key.to_string(),
                source,
            }
            .into()
        })
    }
}

#[async_trait]
impl<S: RemoteStore> CertificateStorage for CertStorage<S> {
    async fn store(&self, key: &str, value: &[u8]) -> VaultResult<()> {
        self.ensure_ready()?;
        KeyCodec::validate_data_key(key)?;

        let sealed = self
            .envelope
            .encode(value, Utc::now())
            .map_err(|e| StorageError::Encode {
                key: key.to_string(),
                reason: match e {
                    CodecError::Encode { reason } => reason,
                    other => other.to_string(),
                },
            })?;

        self.adapter
            .set(&self.codec.to_physical(key), &sealed)
            .await
            .map_err(|e| StorageError::Store {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        tracing::trace!(key = %key, size = value.len(), "Stored value");
        Ok(())
    }

    async fn load(&self, key: &str) -> VaultResult<Vec<u8>> {
        Ok(self.fetch_envelope(key).await?.value)
    }

    async fn delete(&self, key: &str) -> VaultResult<()> {
        // undecodable entries can still be deleted
        self.fetch_raw(key).await?;
        self.adapter
            .delete(&self.codec.to_physical(key))
            .await
            .map_err(|e| StorageError::Store {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        tracing::trace!(key = %key, "Deleted value");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.fetch_envelope(key).await.is_ok()
    }

    async fn list(&self, prefix: &str, recursive: bool) -> VaultResult<Vec<String>> {
        self.ensure_ready()?;
        Ok(self.listing.list(prefix, recursive).await?)
    }

    async fn stat(&self, key: &str) -> VaultResult<KeyInfo> {
        let envelope = self.fetch_envelope(key).await?;
        Ok(KeyInfo::for_value(key, envelope.modified, &envelope.value))
    }

    async fn lock(&self, key: &str, cancel: &CancellationToken) -> VaultResult<()> {
        self.ensure_ready()?;
        Ok(self.locks.lock(key, cancel).await?)
    }

    async fn unlock(&self, key: &str) -> VaultResult<()> {
        self.ensure_ready()?;
        Ok(self.locks.unlock(key).await?)
    }
}
