//! Ordered `(key, value)` change batches and their JSON wire shape.
//!
//! On the wire a batch is a JSON array of two-element arrays:
//!
//! ```json
//! [["temp", [[72.5]]], ["status", "idle"]]
//! ```

use serde::Serialize;

use super::value::KeyValue;

/// Changes accumulated between two pushes, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeBatch {
    entries: Vec<(String, KeyValue)>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one change.
    pub fn push(&mut self, key: impl Into<String>, value: KeyValue) {
        self.entries.push((key.into(), value));
    }

    /// Moves every entry out, leaving this batch empty for reuse.
    pub fn drain(&mut self) -> ChangeBatch {
        std::mem::take(self)
    }

    /// Sorts entries by key name.
    pub fn sort_by_key(&mut self) {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Returns the value recorded for `key`, if any (the last one wins).
    pub fn get(&self, key: &str) -> Option<&KeyValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(String, KeyValue)] {
        &self.entries
    }
}

impl FromIterator<(String, KeyValue)> for ChangeBatch {
    fn from_iter<I: IntoIterator<Item = (String, KeyValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
