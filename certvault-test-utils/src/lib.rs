//! certvault Test Utilities
//!
//! Centralized test infrastructure for the certvault workspace:
//! - Proptest generators for keys, values and configurations
//! - Test fixtures for common scenarios (fast lock timings, a prepared
//!   facade over the in-memory store)
//! - Custom assertions for certvault error variants
//! - Tracing initialisation for tests

// Re-export the in-memory backend from its source crate
pub use certvault_storage::{CertStorage, CertificateStorage, InMemoryRemoteStore, StoreOp};

// Re-export core types for convenience
pub use certvault_core::{
    KeyInfo, LockConfig, LockError, StorageConfig, StorageError, Timestamp, VaultError,
    VaultResult,
};

use std::sync::Arc;

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber honouring `RUST_LOG`, writing through the test
/// harness. Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating certvault inputs.

    use super::*;
    use proptest::prelude::*;

    /// A single path segment that survives key cleaning unchanged.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9_.-]{0,11}".prop_filter("not a dot segment or lock suffix", |s| {
            s != "." && s != ".." && !s.ends_with(".lock")
        })
    }

    /// A clean logical key of 1-4 segments, like `acme/example.com/cert`.
    pub fn arb_logical_key() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 1..5).prop_map(|segments| segments.join("/"))
    }

    /// An arbitrary stored value, including empty and binary content.
    pub fn arb_value() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..512)
    }

    /// A valid 32-byte AES key as a string.
    pub fn arb_aes_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9]{32}"
    }

    /// A valid storage configuration, encrypted or plaintext.
    pub fn arb_valid_config() -> impl Strategy<Value = StorageConfig> {
        (
            prop_oneof![Just(String::new()), arb_aes_key()],
            "[a-z]{1,8}",
        )
            .prop_map(|(aes_key, key_prefix)| StorageConfig {
                aes_key,
                key_prefix,
                ..StorageConfig::default()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// A valid 32-byte AES-256 key.
    pub const TEST_AES_KEY: &str = "0123456789abcdef0123456789abcdef";

    /// Default configuration with encryption enabled.
    pub fn encrypted_config() -> StorageConfig {
        StorageConfig {
            aes_key: TEST_AES_KEY.to_string(),
            ..StorageConfig::default()
        }
    }

    /// Default configuration without encryption.
    pub fn plaintext_config() -> StorageConfig {
        StorageConfig::default()
    }

    /// Lock timings scaled down for paused-clock tests: 300ms leases
    /// refreshed every 100ms, polled every 50ms, scanned 3 keys at a time.
    pub fn fast_lock_config() -> LockConfig {
        LockConfig::default()
            .with_lease_duration(Duration::from_millis(300))
            .with_refresh_interval(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(50))
            .with_scan_count(3)
    }

    /// A connected facade over a fresh in-memory store.
    pub async fn memory_storage(
        config: StorageConfig,
    ) -> VaultResult<(CertStorage<InMemoryRemoteStore>, Arc<InMemoryRemoteStore>)> {
        let store = Arc::new(InMemoryRemoteStore::new());
        let storage = shared_storage(config, &store).await?;
        Ok((storage, store))
    }

    /// Another facade on an existing store, standing in for a second process.
    pub async fn shared_storage(
        config: StorageConfig,
        store: &Arc<InMemoryRemoteStore>,
    ) -> VaultResult<CertStorage<InMemoryRemoteStore>> {
        CertStorage::connect(config, fast_lock_config(), Arc::clone(store)).await
    }

    /// A token that is already cancelled.
    pub fn cancelled_token() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for certvault-specific validation.

    use super::*;

    /// Assert that a VaultResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &VaultResult<T>) {
        match result {
            Err(VaultError::Storage(StorageError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a VaultResult is a decode (authentication or format) failure.
    #[track_caller]
    pub fn assert_decode_failure<T: std::fmt::Debug>(result: &VaultResult<T>) {
        match result {
            Err(VaultError::Storage(StorageError::Decode { .. })) => {}
            other => panic!("Expected Decode error, got: {:?}", other),
        }
    }

    /// Assert that a VaultResult is an InvalidKey storage error.
    #[track_caller]
    pub fn assert_invalid_key<T: std::fmt::Debug>(result: &VaultResult<T>) {
        match result {
            Err(VaultError::Storage(StorageError::InvalidKey { .. })) => {}
            other => panic!("Expected InvalidKey error, got: {:?}", other),
        }
    }

    /// Assert that a VaultResult is a cancelled lock wait.
    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(result: &VaultResult<T>) {
        match result {
            Err(VaultError::Lock(LockError::Cancelled { .. })) => {}
            other => panic!("Expected Cancelled lock error, got: {:?}", other),
        }
    }
}
