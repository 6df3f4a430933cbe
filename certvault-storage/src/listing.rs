//! Key listing over cursor scans.
//!
//! Scans the remote keyspace page by page until the cursor returns to zero,
//! maps physical keys back to logical ones and, for non-recursive listings,
//! collapses deeper keys into their first path segment under the prefix.

use std::collections::BTreeSet;

use certvault_core::{StorageError, KEY_SEPARATOR};

use crate::adapter::StoreAdapter;
use crate::keys::{clean_path, KeyCodec};
use crate::remote::{RemoteStore, INITIAL_CURSOR};

/// Prefix value that lists the whole namespace.
pub const LIST_EVERYTHING: &str = "*";

/// What a `List` call asks for, after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// Every key in the namespace.
    Everything,
    /// Keys strictly below a cleaned logical prefix.
    Under(String),
}

impl ListScope {
    /// Normalize a caller-supplied prefix.
    ///
    /// `*`, blank strings and prefixes that clean to the root all select the
    /// whole namespace.
    pub fn from_prefix(prefix: &str) -> Self {
        let trimmed = prefix.trim();
        if trimmed.is_empty() || trimmed == LIST_EVERYTHING {
            return ListScope::Everything;
        }
        match clean_path(trimmed) {
            cleaned if cleaned.is_empty() => ListScope::Everything,
            cleaned => ListScope::Under(cleaned),
        }
    }

    /// Whether a logical key falls inside this scope.
    fn contains(&self, logical: &str) -> bool {
        match self {
            ListScope::Everything => !logical.is_empty(),
            ListScope::Under(prefix) => logical
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with(KEY_SEPARATOR) && rest.len() > 1),
        }
    }
}

/// Collapse logical keys to the immediate children of `prefix`.
pub fn collapse_to_children<'a, I>(prefix: &str, keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut children = BTreeSet::new();
    for key in keys {
        let Some(rest) = key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
        else {
            continue;
        };
        let first = rest.split(KEY_SEPARATOR).next().unwrap_or(rest);
        children.insert(format!("{}{}{}", prefix, KEY_SEPARATOR, first));
    }
    children
}

/// Lists logical keys for one namespace.
pub struct ListingEngine<S: RemoteStore> {
    adapter: StoreAdapter<S>,
    codec: KeyCodec,
    scan_count: usize,
}

impl<S: RemoteStore> ListingEngine<S> {
    pub fn new(adapter: StoreAdapter<S>, codec: KeyCodec, scan_count: usize) -> Self {
        Self {
            adapter,
            codec,
            scan_count,
        }
    }

    /// List keys under `prefix`.
    ///
    /// With `recursive` every key below the prefix is returned. Otherwise only
    /// the prefix's immediate children are, with deeper keys collapsed into
    /// the child that contains them. Lease keys are never listed. Results are
    /// sorted and unique; a failed page discards everything collected so far.
    pub async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<String>, StorageError> {
        let scope = ListScope::from_prefix(prefix);
        let pattern = match &scope {
            ListScope::Everything => self.codec.scan_pattern(None),
            ListScope::Under(cleaned) => self.codec.scan_pattern(Some(cleaned)),
        };

        let physical = self.scan_all(prefix, &pattern).await?;

        let logical: BTreeSet<String> = physical
            .iter()
            .filter(|key| !KeyCodec::is_lock_key(key))
            .filter_map(|key| self.codec.strip_prefix(key))
            .filter(|key| scope.contains(key))
            .collect();

        let keys = match (&scope, recursive) {
            (ListScope::Under(cleaned), false) => collapse_to_children(cleaned, &logical),
            _ => logical,
        };

        tracing::debug!(
            prefix = %prefix,
            recursive = recursive,
            scanned = physical.len(),
            listed = keys.len(),
            "Listed keys"
        );
        Ok(keys.into_iter().collect())
    }

    /// Follow the scan cursor until it returns to zero.
    async fn scan_all(&self, prefix: &str, pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut cursor = INITIAL_CURSOR;
        let mut physical = Vec::new();
        loop {
            let page = self
                .adapter
                .scan(cursor, pattern, self.scan_count)
                .await
                .map_err(|e| StorageError::List {
                    prefix: prefix.to_string(),
                    reason: e.to_string(),
                })?;
            physical.extend(page.keys);
            cursor = page.cursor;
            if cursor == INITIAL_CURSOR {
                return Ok(physical);
            }
        }
    }
}
