//! In-process store used by tests and for running without a Redis server.
//!
//! Behaves like the slice of Redis the monitor relies on: string values,
//! `TYPE` answers for a few other kinds, and a `SET` notification for every
//! write made through [`KeyValueStore::set`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex, RwLock,
};
use tracing::warn;

use crate::application::store::{KeyEventSource, KeyKind, KeyValueStore, StoreError};

/// Capacity of each subscriber's notification channel.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum StoredValue {
    String(String),
    /// A non-string key; only its type is modelled.
    Other(KeyKind),
}

/// Thread-safe in-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with string values, without notifying.
    pub fn with_strings<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = values
            .into_iter()
            .map(|(k, v)| (k.into(), StoredValue::String(v.into())))
            .collect();
        Self {
            entries: RwLock::new(entries),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Stores a key of a non-string kind (a list, a hash, ...).
    pub async fn insert_other(&self, key: &str, kind: KeyKind) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredValue::Other(kind));
    }

    /// Deletes a key.  Returns `true` if it existed.
    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn notify_set(&self, key: &str) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| match tx.try_send(key.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(key, "set notification dropped; subscriber is full");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn key_kind(&self, key: &str) -> Result<KeyKind, StoreError> {
        Ok(match self.entries.read().await.get(key) {
            Some(StoredValue::String(_)) => KeyKind::String,
            Some(StoredValue::Other(kind)) => *kind,
            None => KeyKind::Missing,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(match self.entries.read().await.get(key) {
            Some(StoredValue::String(value)) => Some(value.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredValue::String(value.to_string()));
        self.notify_set(key).await;
        Ok(())
    }
}

#[async_trait]
impl KeyEventSource for MemoryStore {
    async fn subscribe_set_events(&self) -> Result<mpsc::Receiver<String>, StoreError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.subscribers.lock().await.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("temp", "72.5").await.unwrap();
        assert_eq!(store.get("temp").await.unwrap().as_deref(), Some("72.5"));
        assert_eq!(store.key_kind("temp").await.unwrap(), KeyKind::String);
    }

    #[tokio::test]
    async fn test_non_string_key_has_no_string_value() {
        let store = MemoryStore::new();
        store.insert_other("jobs", KeyKind::List).await;

        assert_eq!(store.key_kind("jobs").await.unwrap(), KeyKind::List);
        assert_eq!(store.get("jobs").await.unwrap(), None);
        assert_eq!(store.scan_keys().await.unwrap(), vec!["jobs".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = MemoryStore::with_strings([("a", "1")]);
        assert!(store.remove("a").await);
        assert_eq!(store.key_kind("a").await.unwrap(), KeyKind::Missing);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscribers_receive_set_notifications() {
        // Arrange
        let store = MemoryStore::new();
        let mut events = store.subscribe_set_events().await.unwrap();

        // Act
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();

        // Assert
        assert_eq!(events.recv().await.as_deref(), Some("a"));
        assert_eq!(events.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_forgotten() {
        let store = MemoryStore::new();
        drop(store.subscribe_set_events().await.unwrap());

        store.set("a", "1").await.unwrap();

        assert!(store.subscribers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_prefilled_values_do_not_notify() {
        let store = MemoryStore::with_strings([("a", "1")]);
        let mut events = store.subscribe_set_events().await.unwrap();

        assert!(events.try_recv().is_err());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
