//! Remote key-value store abstraction.
//!
//! The facade never talks to a concrete client. Everything it needs from the
//! shared store (plain get/set/delete, cursor-paged scans and token-guarded
//! leases) is expressed by [`RemoteStore`], and every process that shares a
//! namespace must point at the same backing store.
//!
//! # Lease Semantics
//!
//! A lease is a key whose value is the owner's [`LeaseToken`] and which
//! carries an expiry. `obtain_lease` is an atomic set-if-absent. The
//! token-guarded operations only act when the stored token matches:
//! `lease_ttl` reports zero for a missing, expired or foreign lease.

pub mod glob;
pub mod lmdb;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use certvault_core::{LeaseToken, RemoteStoreError};

pub use lmdb::{LmdbRemoteStore, LmdbStoreError};
pub use memory::InMemoryRemoteStore;

/// Result type for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteStoreError>;

/// Cursor value that starts a scan and signals its end.
pub const INITIAL_CURSOR: u64 = 0;

/// Page size used when a caller passes a zero count hint.
const FALLBACK_SCAN_COUNT: usize = 10;

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Matching physical keys in this page. May be empty even mid-scan.
    pub keys: Vec<String>,
    /// Cursor for the next page; [`INITIAL_CURSOR`] when the scan is done.
    pub cursor: u64,
}

impl ScanPage {
    pub fn is_last(&self) -> bool {
        self.cursor == INITIAL_CURSOR
    }
}

/// Remote store operations, named for fault injection and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Ping,
    Get,
    Set,
    Delete,
    Exists,
    Scan,
    ObtainLease,
    LeaseTtl,
    RefreshLease,
    ReleaseLease,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Ping => "ping",
            StoreOp::Get => "get",
            StoreOp::Set => "set",
            StoreOp::Delete => "delete",
            StoreOp::Exists => "exists",
            StoreOp::Scan => "scan",
            StoreOp::ObtainLease => "obtain_lease",
            StoreOp::LeaseTtl => "lease_ttl",
            StoreOp::RefreshLease => "refresh_lease",
            StoreOp::ReleaseLease => "release_lease",
        }
    }
}

/// Shared key-value store with cursor scans and expiring leases.
///
/// Implementations must be safe to share between tasks. Values written with
/// `set` never expire.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Check connectivity.
    async fn ping(&self) -> RemoteResult<()>;

    /// Fetch a value. Absent keys yield [`RemoteStoreError::NotFound`].
    async fn get(&self, key: &str) -> RemoteResult<Vec<u8>>;

    /// Write a value with no expiry, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &[u8]) -> RemoteResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> RemoteResult<()>;

    /// Whether a live key exists.
    async fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// Return one page of keys matching `pattern`, starting at `cursor`.
    ///
    /// `count` is a hint for how much of the keyspace one page examines.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RemoteResult<ScanPage>;

    /// Atomically create `key` holding `token` with expiry `ttl` if no live
    /// key exists. Fails with [`RemoteStoreError::LeaseNotObtained`] otherwise.
    async fn obtain_lease(&self, key: &str, token: &LeaseToken, ttl: Duration) -> RemoteResult<()>;

    /// Remaining lifetime of the lease if it is held under `token`, else zero.
    async fn lease_ttl(&self, key: &str, token: &LeaseToken) -> RemoteResult<Duration>;

    /// Reset the lease expiry to `ttl` if it is held under `token`.
    ///
    /// Fails with [`RemoteStoreError::LeaseNotHeld`] otherwise.
    async fn refresh_lease(&self, key: &str, token: &LeaseToken, ttl: Duration)
        -> RemoteResult<()>;

    /// Delete the lease if it is held under `token`.
    ///
    /// Fails with [`RemoteStoreError::LeaseNotHeld`] otherwise.
    async fn release_lease(&self, key: &str, token: &LeaseToken) -> RemoteResult<()>;
}

/// Normalize a scan count hint.
pub(crate) fn effective_scan_count(count: usize) -> usize {
    if count == 0 {
        FALLBACK_SCAN_COUNT
    } else {
        count
    }
}

/// Cut one page out of an ordered key listing.
///
/// Examines up to `count` keys starting at offset `cursor` and keeps those for
/// which `keep` returns true. Shared by the backends so their cursor
/// behaviour is identical.
pub(crate) fn page_of<'a, I, F>(keys: I, cursor: u64, pattern: &str, count: usize, keep: F) -> ScanPage
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> bool,
{
    let count = effective_scan_count(count);
    let start = usize::try_from(cursor).unwrap_or(usize::MAX);

    let mut examined = 0usize;
    let mut total = 0usize;
    let mut matched = Vec::new();
    for (index, key) in keys.into_iter().enumerate() {
        total = index + 1;
        if index < start || examined >= count {
            continue;
        }
        examined += 1;
        if keep(key) && glob::glob_match(pattern, key) {
            matched.push(key.to_string());
        }
    }

    let next = start.saturating_add(examined);
    let cursor = if examined == 0 || next >= total {
        INITIAL_CURSOR
    } else {
        next as u64
    };
    ScanPage {
        keys: matched,
        cursor,
    }
}
