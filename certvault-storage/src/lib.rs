//! certvault Storage - Encrypted Certificate Storage with Distributed Locking
//!
//! Stores opaque certificate material under a namespaced prefix in a shared
//! remote key-value store, optionally sealed with AES-256-GCM, and provides
//! lease-based mutual exclusion so several certificate managers sharing the
//! store never issue the same certificate twice.

pub mod adapter;
pub mod envelope;
pub mod facade;
pub mod keys;
pub mod listing;
pub mod lock_manager;
pub mod remote;
pub mod traits;

pub use adapter::StoreAdapter;
pub use envelope::{EnvelopeCodec, StoredEnvelope, NONCE_LEN};
pub use facade::CertStorage;
pub use keys::{clean_path, KeyCodec};
pub use listing::{ListScope, ListingEngine, LIST_EVERYTHING};
pub use lock_manager::{LockManager, LockMetrics, LockMetricsSnapshot};
pub use remote::{
    InMemoryRemoteStore, LmdbRemoteStore, LmdbStoreError, RemoteResult, RemoteStore, ScanPage,
    StoreOp, INITIAL_CURSOR,
};
pub use traits::CertificateStorage;
