//! Lease typestate for compile-time safety of the lease lifecycle.
//!
//! A lease can only be refreshed or released while it is in the `Held`
//! state, and releasing consumes it.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unheld) ── obtain ──→ Held ── release() ──→ (unheld)
//!                         │
//!                  mark_refreshed() ↺
//! ```
//!
//! The lock manager's registry stores `Lease<Held>` values. Holding one is a
//! local belief, not a guarantee: the remote store is the only authority on
//! who owns a lease at any moment.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// LEASE TOKEN
// ============================================================================

/// Opaque ownership token written as the lease value in the remote store.
///
/// Refresh, TTL and release only act on a lease whose stored token matches,
/// so a process can never extend or drop a lease someone else obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        LeaseToken(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// LEASE PHASE
// ============================================================================

/// Per-key lease lifecycle phase, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeasePhase {
    Unheld,
    Acquiring,
    Held,
    StaleDetected,
    Released,
    RefreshFailed,
}

impl LeasePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeasePhase::Unheld => "unheld",
            LeasePhase::Acquiring => "acquiring",
            LeasePhase::Held => "held",
            LeasePhase::StaleDetected => "stale_detected",
            LeasePhase::Released => "released",
            LeasePhase::RefreshFailed => "refresh_failed",
        }
    }
}

impl fmt::Display for LeasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LEASE DATA (state-independent)
// ============================================================================

/// Data carried by a lease, independent of typestate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    /// Logical key the caller locked.
    pub logical_key: String,
    /// Physical lease key in the remote store (`<prefix>/<key>.lock`).
    pub lock_key: String,
    pub token: LeaseToken,
    pub acquired_at: Timestamp,
    /// Local estimate of the remote expiry, updated on every refresh.
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// Calculate remaining duration until the estimated expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// Lease is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

/// Lease has been released (for documentation; leases in this state don't exist at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released;
impl LeaseState for Released {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
    impl Sealed for super::Released {}
}

// ============================================================================
// LEASE TYPESTATE WRAPPER
// ============================================================================

/// A lease with compile-time state tracking.
#[derive(Debug, Clone)]
pub struct Lease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> Lease<S> {
    /// Access the underlying lease data (read-only).
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn logical_key(&self) -> &str {
        &self.data.logical_key
    }

    pub fn token(&self) -> &LeaseToken {
        &self.data.token
    }
}

impl Lease<Held> {
    /// Create a held lease. Only call this after the remote store granted it.
    pub fn obtained(
        logical_key: impl Into<String>,
        lock_key: impl Into<String>,
        token: LeaseToken,
        now: Timestamp,
        duration: Duration,
    ) -> Self {
        Lease {
            data: LeaseData {
                logical_key: logical_key.into(),
                lock_key: lock_key.into(),
                token,
                acquired_at: now,
                expires_at: now + to_chrono(duration),
            },
            _state: PhantomData,
        }
    }

    /// Record a successful remote refresh: the lease now expires `duration`
    /// after `now`.
    pub fn mark_refreshed(&mut self, now: Timestamp, duration: Duration) {
        self.data.expires_at = now + to_chrono(duration);
    }

    /// Whether this lease was issued under `token`.
    pub fn is_owned_by(&self, token: &LeaseToken) -> bool {
        &self.data.token == token
    }

    /// Release the lease and return the underlying data.
    ///
    /// Consumes the lease, preventing further refreshes.
    pub fn release(self) -> LeaseData {
        self.data
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::milliseconds(duration.as_millis() as i64))
}
