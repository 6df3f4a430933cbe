//! Error types for certvault operations

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a remote store client.
///
/// `NotFound` is the store's "key absent" signal and is kept separate from
/// every other failure so the facade can surface it unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteStoreError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Lease not obtained for {key}: held by another owner")]
    LeaseNotObtained { key: String },

    #[error("Lease not held for {key}")]
    LeaseNotHeld { key: String },

    #[error("Remote store {operation} failed: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Remote store {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

impl RemoteStoreError {
    /// Shorthand for a backend failure.
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        RemoteStoreError::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is the store's "key absent" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteStoreError::NotFound { .. })
    }
}

/// Failures while turning stored bytes back into an envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Wrong key, or the ciphertext was tampered with or corrupted.
    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    /// Decrypted fine but the payload does not have the envelope schema.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// Too short to even hold a nonce.
    #[error("ciphertext truncated: {len} bytes")]
    Truncated { len: usize },
}

/// Envelope codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Storage facade errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Unable to encode data for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Unable to decode data for {key}: {source}")]
    Decode { key: String, source: DecodeError },

    #[error("Unable to store data for {key}: {reason}")]
    Store { key: String, reason: String },

    #[error("Unable to list keys under {prefix:?}: {reason}")]
    List { prefix: String, reason: String },

    #[error("Storage is not ready (closed or never connected)")]
    NotReady,
}

/// Lock manager errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// Someone else holds the lease. Retried internally by `Lock`.
    #[error("Lock not obtained for {key}")]
    NotObtained { key: String },

    #[error("Lock failure for {key}: {reason}")]
    Remote { key: String, reason: String },

    #[error("Lock for {key} released locally, remote release failed: {reason}")]
    Release { key: String, reason: String },

    #[error("Lock wait for {key} cancelled")]
    Cancelled { key: String },

    #[error("Lock wait for {key} exceeded deadline after {waited:?}")]
    DeadlineExceeded { key: String, waited: Duration },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Master error type for all certvault errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteStoreError),
}

impl VaultError {
    /// True only for the dedicated "key absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::Storage(StorageError::NotFound { .. }))
    }

    /// True when stored bytes could not be decrypted or parsed.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, VaultError::Storage(StorageError::Decode { .. }))
    }

    /// True when a lock wait ended because the caller gave up.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            VaultError::Lock(LockError::Cancelled { .. })
                | VaultError::Lock(LockError::DeadlineExceeded { .. })
        )
    }
}

/// Result type alias for certvault operations.
pub type VaultResult<T> = Result<T, VaultError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            key: "acme/example.com/cert".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Key not found"));
        assert!(msg.contains("acme/example.com/cert"));
    }

    #[test]
    fn test_decode_error_is_distinct_from_not_found() {
        let decode = VaultError::from(StorageError::Decode {
            key: "k".to_string(),
            source: DecodeError::Authentication,
        });
        assert!(decode.is_decode_failure());
        assert!(!decode.is_not_found());

        let missing = VaultError::from(StorageError::NotFound {
            key: "k".to_string(),
        });
        assert!(missing.is_not_found());
        assert!(!missing.is_decode_failure());
    }

    #[test]
    fn test_lock_error_display_deadline() {
        let err = LockError::DeadlineExceeded {
            key: "issue_cert_example.com".to_string(),
            waited: Duration::from_secs(3),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("issue_cert_example.com"));
        assert!(msg.contains("3s"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("aes_key", "REDACTED", "must be 32 bytes");
        let msg = format!("{}", err);
        assert!(msg.contains("aes_key"));
        assert!(msg.contains("must be 32 bytes"));
    }

    #[test]
    fn test_vault_error_from_variants() {
        let storage = VaultError::from(StorageError::NotReady);
        assert!(matches!(storage, VaultError::Storage(_)));

        let lock = VaultError::from(LockError::Cancelled {
            key: "x".to_string(),
        });
        assert!(matches!(lock, VaultError::Lock(_)));
        assert!(lock.is_cancelled());

        let config = VaultError::from(ConfigError::MissingRequired {
            field: "host".to_string(),
        });
        assert!(matches!(config, VaultError::Config(_)));

        let remote = VaultError::from(RemoteStoreError::backend("ping", "connection refused"));
        assert!(matches!(remote, VaultError::Remote(_)));
    }

    #[test]
    fn test_remote_store_error_is_not_found() {
        assert!(RemoteStoreError::NotFound {
            key: "a".to_string()
        }
        .is_not_found());
        assert!(!RemoteStoreError::backend("get", "io").is_not_found());
    }
}
