//! Store contract required by the change feed and the write-back endpoint.
//!
//! Only a narrow slice of a key-value store is needed: enumerate keys, ask a
//! key's type, read and write string values, and (in subscribe mode) learn
//! which keys were just `SET`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A command sent to Redis failed.
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store cannot serve requests at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The change-notification subscription could not be set up.
    #[error("keyevent subscription failed: {0}")]
    Subscription(String),
}

/// Data type of a stored key, as reported by `TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Stream,
    /// The key does not exist (it may have expired after the scan).
    Missing,
    Other,
}

impl KeyKind {
    /// Maps a `TYPE` reply to a kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "string" => KeyKind::String,
            "list" => KeyKind::List,
            "set" => KeyKind::Set,
            "zset" => KeyKind::SortedSet,
            "hash" => KeyKind::Hash,
            "stream" => KeyKind::Stream,
            "none" => KeyKind::Missing,
            _ => KeyKind::Other,
        }
    }
}

/// Read/write access to the watched database.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns every key in the database, in no particular order.
    async fn scan_keys(&self) -> Result<Vec<String>, StoreError>;

    async fn key_kind(&self, key: &str) -> Result<KeyKind, StoreError>;

    /// Returns the string value of `key`, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Source of "key was set" notifications.
#[async_trait]
pub trait KeyEventSource: Send + Sync {
    /// Starts delivering the name of every key that is `SET` in the watched
    /// database.  The receiver closes when the subscription is lost.
    async fn subscribe_set_events(&self) -> Result<mpsc::Receiver<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_kind_from_type_reply() {
        assert_eq!(KeyKind::from_type_name("string"), KeyKind::String);
        assert_eq!(KeyKind::from_type_name("zset"), KeyKind::SortedSet);
        assert_eq!(KeyKind::from_type_name("none"), KeyKind::Missing);
        assert_eq!(KeyKind::from_type_name("ReJSON-RL"), KeyKind::Other);
    }
}
