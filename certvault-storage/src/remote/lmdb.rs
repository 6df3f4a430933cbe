//! LMDB-backed remote store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! store that survives restarts. Every process on the host that opens the
//! same directory shares the keyspace, so it can coordinate certificate
//! managers running side by side without a network server.
//!
//! # Record Format
//!
//! `[expires_at_ms: 8 bytes LE][payload]`, where `expires_at_ms` is a Unix
//! timestamp in milliseconds and `0` means the record never expires.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`, `exists`, `scan` and `lease_ttl`
//! - Write transactions for `set`, `delete` and the lease mutations, so each
//!   check-then-write lease operation is atomic

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use certvault_core::{LeaseToken, RemoteStoreError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use super::{
    effective_scan_count, glob, RemoteResult, RemoteStore, ScanPage, StoreOp, INITIAL_CURSOR,
};

/// Length of the expiry header on every record.
const HEADER_LEN: usize = 8;

/// Expiry header value for records without a TTL.
const NO_EXPIRY: u64 = 0;

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for RemoteStoreError {
    fn from(e: LmdbStoreError) -> Self {
        RemoteStoreError::backend("open", e)
    }
}

/// LMDB-backed [`RemoteStore`].
pub struct LmdbRemoteStore {
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbRemoteStore")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbRemoteStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn read_txn(&self, op: StoreOp) -> RemoteResult<RoTxn<'_>> {
        self.env
            .read_txn()
            .map_err(|e| RemoteStoreError::backend(op.as_str(), e))
    }

    /// Fetch the decoded record for `key` if it is live.
    fn live_record(&self, txn: &RoTxn<'_>, op: StoreOp, key: &str) -> RemoteResult<Option<Record>> {
        let bytes = self
            .db
            .get(txn, key.as_bytes())
            .map_err(|e| RemoteStoreError::backend(op.as_str(), e))?;
        match bytes {
            Some(bytes) => {
                let record = Record::decode(op, bytes)?;
                Ok(record.is_live(now_ms()).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Run a check-then-write lease mutation inside one write transaction.
    ///
    /// `mutate` inspects the live record and returns what to write: `Some`
    /// to store a record, `None` to delete the key.
    fn with_write<F>(&self, op: StoreOp, key: &str, mutate: F) -> RemoteResult<()>
    where
        F: FnOnce(Option<&Record>) -> RemoteResult<Option<Record>>,
    {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| RemoteStoreError::backend(op.as_str(), e))?;

        let current = self.live_record(&wtxn, op, key)?;
        match mutate(current.as_ref())? {
            Some(record) => self
                .db
                .put(&mut wtxn, key.as_bytes(), &record.encode())
                .map_err(|e| RemoteStoreError::backend(op.as_str(), e))?,
            None => {
                self.db
                    .delete(&mut wtxn, key.as_bytes())
                    .map_err(|e| RemoteStoreError::backend(op.as_str(), e))?;
            }
        }

        wtxn.commit()
            .map_err(|e| RemoteStoreError::backend(op.as_str(), e))
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    expires_at_ms: u64,
    payload: Vec<u8>,
}

impl Record {
    fn persistent(payload: &[u8]) -> Self {
        Self {
            expires_at_ms: NO_EXPIRY,
            payload: payload.to_vec(),
        }
    }

    fn expiring(payload: &[u8], ttl: Duration) -> Self {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self {
            // a zero expiry would read as "never", so expire at least 1ms out
            expires_at_ms: now_ms().saturating_add(ttl_ms.max(1)),
            payload: payload.to_vec(),
        }
    }

    fn decode(op: StoreOp, bytes: &[u8]) -> RemoteResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RemoteStoreError::backend(
                op.as_str(),
                format!("corrupt record: {} bytes", bytes.len()),
            ));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        Ok(Self {
            expires_at_ms: u64::from_le_bytes(header),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.expires_at_ms.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms == NO_EXPIRY || now_ms < self.expires_at_ms
    }

    fn remaining(&self, now_ms: u64) -> Duration {
        if self.expires_at_ms == NO_EXPIRY {
            return Duration::ZERO;
        }
        Duration::from_millis(self.expires_at_ms.saturating_sub(now_ms))
    }

    fn held_by(&self, token: &LeaseToken) -> bool {
        self.payload == token.as_bytes()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn not_held(key: &str) -> RemoteStoreError {
    RemoteStoreError::LeaseNotHeld {
        key: key.to_string(),
    }
}

#[async_trait]
impl RemoteStore for LmdbRemoteStore {
    async fn ping(&self) -> RemoteResult<()> {
        self.read_txn(StoreOp::Ping).map(|_| ())
    }

    async fn get(&self, key: &str) -> RemoteResult<Vec<u8>> {
        let rtxn = self.read_txn(StoreOp::Get)?;
        self.live_record(&rtxn, StoreOp::Get, key)?
            .map(|record| record.payload)
            .ok_or_else(|| RemoteStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn set(&self, key: &str, value: &[u8]) -> RemoteResult<()> {
        self.with_write(StoreOp::Set, key, |_| Ok(Some(Record::persistent(value))))
    }

    async fn delete(&self, key: &str) -> RemoteResult<()> {
        self.with_write(StoreOp::Delete, key, |_| Ok(None))
    }

    async fn exists(&self, key: &str) -> RemoteResult<bool> {
        let rtxn = self.read_txn(StoreOp::Exists)?;
        Ok(self.live_record(&rtxn, StoreOp::Exists, key)?.is_some())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RemoteResult<ScanPage> {
        let rtxn = self.read_txn(StoreOp::Scan)?;
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let count = effective_scan_count(count);
        let now = now_ms();

        // the cursor is a record offset; skipped records are never decoded
        let records = self
            .db
            .iter(&rtxn)
            .map_err(|e| RemoteStoreError::backend(StoreOp::Scan.as_str(), e))?
            .skip(start);

        let mut examined = 0usize;
        let mut exhausted = true;
        let mut keys = Vec::new();
        for result in records {
            if examined == count {
                exhausted = false;
                break;
            }
            examined += 1;

            let (key, bytes) =
                result.map_err(|e| RemoteStoreError::backend(StoreOp::Scan.as_str(), e))?;
            let Ok(key) = std::str::from_utf8(key) else {
                continue;
            };
            let record = match Record::decode(StoreOp::Scan, bytes) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Skipping undecodable record in scan"
                    );
                    continue;
                }
            };
            if record.is_live(now) && glob::glob_match(pattern, key) {
                keys.push(key.to_string());
            }
        }

        let cursor = if exhausted {
            INITIAL_CURSOR
        } else {
            start.saturating_add(examined) as u64
        };
        Ok(ScanPage { keys, cursor })
    }

    async fn obtain_lease(&self, key: &str, token: &LeaseToken, ttl: Duration) -> RemoteResult<()> {
        self.with_write(StoreOp::ObtainLease, key, |current| match current {
            Some(_) => Err(RemoteStoreError::LeaseNotObtained {
                key: key.to_string(),
            }),
            None => Ok(Some(Record::expiring(token.as_bytes(), ttl))),
        })
    }

    async fn lease_ttl(&self, key: &str, token: &LeaseToken) -> RemoteResult<Duration> {
        let rtxn = self.read_txn(StoreOp::LeaseTtl)?;
        Ok(self
            .live_record(&rtxn, StoreOp::LeaseTtl, key)?
            .filter(|record| record.held_by(token))
            .map(|record| record.remaining(now_ms()))
            .unwrap_or(Duration::ZERO))
    }

    async fn refresh_lease(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> RemoteResult<()> {
        self.with_write(StoreOp::RefreshLease, key, |current| match current {
            Some(record) if record.held_by(token) => {
                Ok(Some(Record::expiring(&record.payload, ttl)))
            }
            _ => Err(not_held(key)),
        })
    }

    async fn release_lease(&self, key: &str, token: &LeaseToken) -> RemoteResult<()> {
        self.with_write(StoreOp::ReleaseLease, key, |current| match current {
            Some(record) if record.held_by(token) => Ok(None),
            _ => Err(not_held(key)),
        })
    }
}
