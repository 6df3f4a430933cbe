//! certvault Core - Data Types
//!
//! Pure data structures with no I/O. The storage crate depends on this.
//! This crate contains ONLY data types, errors and configuration.

pub mod config;
pub mod error;
pub mod lease;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use config::{LockConfig, StorageConfig};
pub use error::{
    CodecError, ConfigError, DecodeError, LockError, RemoteStoreError, StorageError, VaultError,
    VaultResult,
};
pub use lease::{Held, Lease, LeaseData, LeasePhase, LeaseState, LeaseToken, Released};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Suffix appended to a physical key to form its lease key.
pub const LOCK_SUFFIX: &str = ".lock";

/// Separator between path segments of logical and physical keys.
pub const KEY_SEPARATOR: char = '/';

/// How long an obtained lease stays valid without a refresh.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(10);

/// How often a held lease is refreshed. Must stay below the lease duration so
/// a single missed cycle does not let the lease expire.
pub const DEFAULT_LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// How long `Lock` sleeps between acquisition attempts.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Page size hint passed to every scan call.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Required AES-256 key length in bytes.
pub const AES_KEY_LEN: usize = 32;

// ============================================================================
// KEY INFO
// ============================================================================

/// Metadata about a stored key, as reported by `Stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Logical key, exactly as the caller supplied it.
    pub key: String,
    /// Write time recorded in the envelope (facade clock, not the store's).
    pub modified: Timestamp,
    /// Size of the stored value in bytes.
    pub size: u64,
    /// Always false: directories only exist as synthesized listing entries.
    pub is_terminal: bool,
}

impl KeyInfo {
    /// Build key info for a stored value.
    pub fn for_value(key: impl Into<String>, modified: Timestamp, value: &[u8]) -> Self {
        Self {
            key: key.into(),
            modified,
            size: value.len() as u64,
            is_terminal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_key_info_for_value() {
        let now = Utc::now();
        let info = KeyInfo::for_value("acme/example.com/cert", now, b"pem-bytes");
        assert_eq!(info.key, "acme/example.com/cert");
        assert_eq!(info.size, 9);
        assert_eq!(info.modified, now);
        assert!(!info.is_terminal);
    }

    #[test]
    fn test_default_timings_are_consistent() {
        assert!(DEFAULT_LOCK_REFRESH_INTERVAL < DEFAULT_LOCK_DURATION);
        assert!(DEFAULT_LOCK_POLL_INTERVAL < DEFAULT_LOCK_DURATION);
    }
}
