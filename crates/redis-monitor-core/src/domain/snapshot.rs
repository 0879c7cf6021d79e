//! Last-broadcast value cache used to suppress redundant updates.

use std::collections::HashMap;

/// Remembers the raw value most recently pushed for every key.
///
/// Entries are created on first observation and overwritten on every
/// change; they are never removed individually.  [`SnapshotCache::clear`]
/// wipes the whole cache when a fresh full snapshot is produced.
#[derive(Debug, Default, Clone)]
pub struct SnapshotCache {
    last: HashMap<String, String>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `raw` as the latest value of `key`.
    ///
    /// Returns `true` when the value should be pushed: always when
    /// `skip_unchanged` is `false`, otherwise only when `raw` differs from
    /// the cached value or the key has not been seen before.
    pub fn observe(&mut self, key: &str, raw: &str, skip_unchanged: bool) -> bool {
        if skip_unchanged && self.last.get(key).map(String::as_str) == Some(raw) {
            return false;
        }
        self.last.insert(key.to_string(), raw.to_string());
        true
    }

    /// Returns the cached raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.last.get(key).map(String::as_str)
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.last.clear();
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
