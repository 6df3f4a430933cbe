//! Storage contract consumed by certificate managers.

use async_trait::async_trait;
use certvault_core::{KeyInfo, VaultResult};
use tokio_util::sync::CancellationToken;

/// Storage and locking operations a certificate manager needs.
///
/// Keys are slash-delimited logical paths. Implementations must report a
/// missing key as `StorageError::NotFound` from `load`, `stat` and
/// `delete`, never as a generic failure.
#[async_trait]
pub trait CertificateStorage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn store(&self, key: &str, value: &[u8]) -> VaultResult<()>;

    /// Load the value stored under `key`.
    async fn load(&self, key: &str) -> VaultResult<Vec<u8>>;

    /// Delete `key`. Deleting a missing key is a `NotFound` error.
    async fn delete(&self, key: &str) -> VaultResult<()>;

    /// Whether `key` can be loaded. Never fails: every error reads as `false`.
    async fn exists(&self, key: &str) -> bool;

    /// List keys under `prefix`; `"*"` or a blank prefix lists everything.
    async fn list(&self, prefix: &str, recursive: bool) -> VaultResult<Vec<String>>;

    /// Metadata for `key`.
    async fn stat(&self, key: &str) -> VaultResult<KeyInfo>;

    /// Acquire the distributed lock for `key`, waiting until it is free or
    /// `cancel` fires.
    async fn lock(&self, key: &str, cancel: &CancellationToken) -> VaultResult<()>;

    /// Release the lock for `key`. Releasing an unheld lock is not an error.
    async fn unlock(&self, key: &str) -> VaultResult<()>;
}
