//! Namespaced key codec.
//!
//! Maps caller-supplied logical keys (slash-delimited paths) onto the remote
//! store's flat key space by joining them under a static prefix. The mapping
//! is 1:1 and derivable from the logical key alone, so nothing about it is
//! stored.
//!
//! # Key Format
//!
//! - data:  `<prefix>/<cleaned logical key>`
//! - lease: `<prefix>/<cleaned logical key>.lock`
//!
//! Logical keys are cleaned as if rooted, so `..` can never climb above the
//! prefix and duplicate or trailing slashes collapse. An empty prefix means
//! no namespacing.

use certvault_core::{StorageError, KEY_SEPARATOR, LOCK_SUFFIX};

use crate::remote::glob::escape_glob;

/// Translates between logical and physical keys for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    /// Normalized prefix: no leading, trailing or duplicate separators.
    prefix: String,
}

impl KeyCodec {
    /// Create a codec for `prefix`. The prefix is cleaned with path rules.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: clean_path(prefix),
        }
    }

    /// The normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical data key for `logical`.
    pub fn to_physical(&self, logical: &str) -> String {
        let cleaned = clean_path(logical);
        match (self.prefix.is_empty(), cleaned.is_empty()) {
            (true, _) => cleaned,
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}{}{}", self.prefix, KEY_SEPARATOR, cleaned),
        }
    }

    /// Physical lease key for `logical`.
    pub fn lock_key(&self, logical: &str) -> String {
        format!("{}{}", self.to_physical(logical), LOCK_SUFFIX)
    }

    /// Inverse of [`KeyCodec::to_physical`].
    ///
    /// Returns `None` for keys outside this namespace. The prefix itself maps
    /// to the root, the empty string.
    pub fn strip_prefix(&self, physical: &str) -> Option<String> {
        if self.prefix.is_empty() {
            return Some(physical.to_string());
        }
        if physical == self.prefix {
            return Some(String::new());
        }
        physical
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
            .map(str::to_string)
    }

    /// Scan pattern matching every physical key that starts with
    /// `to_physical(logical_prefix)`. `None` matches the whole namespace.
    pub fn scan_pattern(&self, logical_prefix: Option<&str>) -> String {
        match logical_prefix {
            Some(prefix) => format!("{}*", escape_glob(&self.to_physical(prefix))),
            None if self.prefix.is_empty() => "*".to_string(),
            None => format!("{}{}*", escape_glob(&self.prefix), KEY_SEPARATOR),
        }
    }

    /// Whether a physical key names a lease rather than a stored value.
    pub fn is_lock_key(physical: &str) -> bool {
        physical.ends_with(LOCK_SUFFIX)
    }

    /// Reject logical keys that cannot be stored.
    ///
    /// Empty keys would alias the namespace root, and keys ending in the lease
    /// suffix would alias the lease of another key.
    pub fn validate_data_key(logical: &str) -> Result<(), StorageError> {
        let cleaned = clean_path(logical);
        if cleaned.is_empty() {
            return Err(StorageError::InvalidKey {
                key: logical.to_string(),
                reason: "key is empty".to_string(),
            });
        }
        if cleaned.ends_with(LOCK_SUFFIX) {
            return Err(StorageError::InvalidKey {
                key: logical.to_string(),
                reason: format!("keys ending in {:?} are reserved for locks", LOCK_SUFFIX),
            });
        }
        Ok(())
    }
}

/// Clean a slash-delimited path as if it were rooted, without the leading slash.
///
/// `.` segments and empty segments are dropped; `..` removes the previous
/// segment and is ignored at the root.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(KEY_SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
