//! Configuration types
//!
//! The host process builds a [`StorageConfig`] (usually from its own module
//! config, optionally overlaid with environment variables) and hands it to
//! the storage facade. Connection fields are carried for remote store clients
//! that speak to a network service; the core only reads the key prefix, the
//! AES key and the operation timeout.

use crate::error::ConfigError;
use crate::{
    AES_KEY_LEN, DEFAULT_LOCK_DURATION, DEFAULT_LOCK_POLL_INTERVAL,
    DEFAULT_LOCK_REFRESH_INTERVAL, DEFAULT_SCAN_COUNT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DB: u32 = 0;
/// Dial/read/write timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_KEY_PREFIX: &str = "caddytls";
pub const DEFAULT_VALUE_PREFIX: &str = "caddy-storage-redis";
pub const DEFAULT_TLS_ENABLED: bool = false;
pub const DEFAULT_TLS_INSECURE: bool = true;

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_HOST: &str = "CERTVAULT_STORE_HOST";
pub const ENV_PORT: &str = "CERTVAULT_STORE_PORT";
pub const ENV_DB: &str = "CERTVAULT_STORE_DB";
pub const ENV_USERNAME: &str = "CERTVAULT_STORE_USERNAME";
pub const ENV_PASSWORD: &str = "CERTVAULT_STORE_PASSWORD";
pub const ENV_TIMEOUT: &str = "CERTVAULT_STORE_TIMEOUT";
pub const ENV_AES_KEY: &str = "CERTVAULT_STORE_AESKEY";
pub const ENV_KEY_PREFIX: &str = "CERTVAULT_STORE_KEYPREFIX";
pub const ENV_VALUE_PREFIX: &str = "CERTVAULT_STORE_VALUEPREFIX";
pub const ENV_TLS_ENABLED: &str = "CERTVAULT_STORE_TLS";
pub const ENV_TLS_INSECURE: &str = "CERTVAULT_STORE_TLS_INSECURE";

const REDACTED: &str = "REDACTED";

// ============================================================================
// STORAGE CONFIG
// ============================================================================

/// Storage backend configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Full `host:port` address. Takes precedence over `host`/`port` when set.
    pub address: String,
    pub host: String,
    pub port: u16,
    /// Logical database selector.
    pub db: u32,
    pub username: String,
    pub password: String,
    /// Connect/read/write and per-operation timeout, in seconds.
    pub timeout: u64,
    pub key_prefix: String,
    /// Validation tag for stored values. Carried, not interpreted.
    pub value_prefix: String,
    /// Empty means values are stored unencrypted.
    pub aes_key: String,
    pub tls_enabled: bool,
    pub tls_insecure: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: DEFAULT_DB,
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            value_prefix: DEFAULT_VALUE_PREFIX.to_string(),
            aes_key: String::new(),
            tls_enabled: DEFAULT_TLS_ENABLED,
            tls_insecure: DEFAULT_TLS_INSECURE,
        }
    }
}

impl StorageConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CERTVAULT_STORE_HOST`: Store host (default: 127.0.0.1)
    /// - `CERTVAULT_STORE_PORT`: Store port (default: 6379)
    /// - `CERTVAULT_STORE_DB`: Logical database number (default: 0)
    /// - `CERTVAULT_STORE_USERNAME` / `CERTVAULT_STORE_PASSWORD`: Credentials
    /// - `CERTVAULT_STORE_TIMEOUT`: Timeout in seconds (default: 5)
    /// - `CERTVAULT_STORE_AESKEY`: 32-byte AES key (default: empty, no encryption)
    /// - `CERTVAULT_STORE_KEYPREFIX`: Key prefix (default: caddytls)
    /// - `CERTVAULT_STORE_VALUEPREFIX`: Value prefix (default: caddy-storage-redis)
    /// - `CERTVAULT_STORE_TLS`: Enable TLS (default: false)
    /// - `CERTVAULT_STORE_TLS_INSECURE`: Skip certificate verification (default: true)
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup` onto this config.
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        if let Some(db) = lookup(ENV_DB).and_then(|s| s.parse().ok()) {
            self.db = db;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = password;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT).and_then(|s| s.parse().ok()) {
            self.timeout = timeout;
        }
        if let Some(aes_key) = lookup(ENV_AES_KEY) {
            self.aes_key = aes_key;
        }
        if let Some(key_prefix) = lookup(ENV_KEY_PREFIX) {
            self.key_prefix = key_prefix;
        }
        if let Some(value_prefix) = lookup(ENV_VALUE_PREFIX) {
            self.value_prefix = value_prefix;
        }
        if let Some(tls) = lookup(ENV_TLS_ENABLED).and_then(|s| parse_bool(&s)) {
            self.tls_enabled = tls;
        }
        if let Some(insecure) = lookup(ENV_TLS_INSECURE).and_then(|s| parse_bool(&s)) {
            self.tls_insecure = insecure;
        }
        self
    }

    /// The address a network client should dial.
    pub fn resolved_address(&self) -> String {
        if self.address.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.address.clone()
        }
    }

    /// Per-operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Raw AES key bytes. Empty when encryption is disabled.
    pub fn aes_key_bytes(&self) -> &[u8] {
        self.aes_key.as_bytes()
    }

    /// Whether stored values are encrypted.
    pub fn encryption_enabled(&self) -> bool {
        !self.aes_key.is_empty()
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - aes_key is empty or exactly 32 bytes
    /// - timeout > 0
    /// - host is set when no address is given
    /// - port > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key_len = self.aes_key.len();
        if key_len != 0 && key_len != AES_KEY_LEN {
            return Err(ConfigError::invalid(
                "aes_key",
                REDACTED,
                format!("aes_key must be {} bytes long, got {}", AES_KEY_LEN, key_len),
            ));
        }

        if self.timeout == 0 {
            return Err(ConfigError::invalid(
                "timeout",
                self.timeout.to_string(),
                "timeout must be greater than 0",
            ));
        }

        if self.address.is_empty() {
            if self.host.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: "host".to_string(),
                });
            }
            if self.port == 0 {
                return Err(ConfigError::invalid(
                    "port",
                    self.port.to_string(),
                    "port must be greater than 0",
                ));
            }
        }

        Ok(())
    }

    /// Copy with secrets replaced, for logging.
    fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = REDACTED.to_string();
        }
        if !copy.aes_key.is_empty() {
            copy.aes_key = REDACTED.to_string();
        }
        copy
    }
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.redacted()) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("StorageConfig")
            .field("address", &redacted.resolved_address())
            .field("db", &redacted.db)
            .field("username", &redacted.username)
            .field("password", &redacted.password)
            .field("timeout", &redacted.timeout)
            .field("key_prefix", &redacted.key_prefix)
            .field("value_prefix", &redacted.value_prefix)
            .field("aes_key", &redacted.aes_key)
            .field("tls_enabled", &redacted.tls_enabled)
            .field("tls_insecure", &redacted.tls_insecure)
            .finish()
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// LOCK CONFIG
// ============================================================================

/// Lease timings for the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long an obtained or refreshed lease stays valid.
    pub lease_duration: Duration,
    /// Period of the background refresher.
    pub refresh_interval: Duration,
    /// Sleep between acquisition attempts while a lease is held elsewhere.
    pub poll_interval: Duration,
    /// Page size hint for scans.
    pub scan_count: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LOCK_DURATION,
            refresh_interval: DEFAULT_LOCK_REFRESH_INTERVAL,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl LockConfig {
    /// Set the lease duration.
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the scan page size hint.
    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    /// Validate the timings.
    ///
    /// The refresh interval must be strictly shorter than the lease duration,
    /// otherwise a held lease expires between refreshes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("lease_duration", self.lease_duration),
            ("refresh_interval", self.refresh_interval),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(
                    field,
                    format!("{:?}", value),
                    format!("{} must be positive", field),
                ));
            }
        }

        // at least one refresh retry must fit before the lease lapses
        if self.refresh_interval * 2 >= self.lease_duration {
            return Err(ConfigError::invalid(
                "refresh_interval",
                format!("{:?}", self.refresh_interval),
                format!(
                    "refresh_interval must be less than half of lease_duration ({:?})",
                    self.lease_duration
                ),
            ));
        }

        if self.scan_count == 0 {
            return Err(ConfigError::invalid(
                "scan_count",
                "0",
                "scan_count must be greater than 0",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
