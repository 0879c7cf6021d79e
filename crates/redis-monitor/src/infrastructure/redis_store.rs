//! Redis implementation of the store contract.
//!
//! Commands go over one multiplexed async connection that is cloned per
//! call.  Set notifications use a separate pub/sub connection subscribed to
//! the keyevent pattern `__keyevent@<db>__:set`; Redis only publishes those
//! when `notify-keyspace-events` enables them, so subscribing first
//! rewrites that setting (see [`merge_notify_flags`]).

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::store::{KeyEventSource, KeyKind, KeyValueStore, StoreError};
use crate::domain::config::RedisConfig;

/// Server setting that controls which notifications are published.
pub const NOTIFY_SETTING: &str = "notify-keyspace-events";

/// Capacity of the channel between the pub/sub reader and the change feed.
const EVENT_BUFFER: usize = 1024;

/// Returns `current` extended so Redis publishes keyevent notifications
/// for string commands.
///
/// `$` (string commands) is added unless it or `A` (alias for all classes)
/// is present, and `E` (keyevent channel) is added if missing.  Existing
/// flags are kept.
///
/// # Examples
///
/// ```rust
/// use redis_monitor::infrastructure::redis_store::merge_notify_flags;
///
/// assert_eq!(merge_notify_flags(""), "$E");
/// assert_eq!(merge_notify_flags("AK"), "AKE");
/// ```
pub fn merge_notify_flags(current: &str) -> String {
    let mut flags = current.to_string();
    if !flags.contains('$') && !flags.contains('A') {
        flags.push('$');
    }
    if !flags.contains('E') {
        flags.push('E');
    }
    flags
}

/// Pub/sub pattern for `SET` keyevents in database `db`.
pub fn keyevent_pattern(db: i64) -> String {
    format!("__keyevent@{db}__:set")
}

/// Store backed by a Redis server.
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    db: i64,
}

impl RedisStore {
    /// Opens a connection to the configured server and database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url())?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!(
            "connected to Redis at {}:{} (db {})",
            config.host, config.port, config.db
        );
        Ok(Self {
            client,
            connection,
            db: config.db,
        })
    }

    /// Makes sure the server publishes `SET` keyevents, updating
    /// `notify-keyspace-events` if needed.  Returns the resulting flags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if `CONFIG GET` or `CONFIG SET` fails
    /// (for example when `CONFIG` is disabled on a managed server).
    pub async fn enable_set_notifications(&self) -> Result<String, StoreError> {
        let mut con = self.connection.clone();
        let reply: HashMap<String, String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg(NOTIFY_SETTING)
            .query_async(&mut con)
            .await?;
        let current = reply.get(NOTIFY_SETTING).cloned().unwrap_or_default();

        let wanted = merge_notify_flags(&current);
        if wanted != current {
            let _: () = redis::cmd("CONFIG")
                .arg("SET")
                .arg(NOTIFY_SETTING)
                .arg(&wanted)
                .query_async(&mut con)
                .await?;
            info!("{NOTIFY_SETTING} changed from {current:?} to {wanted:?}");
        }
        Ok(wanted)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut con = self.connection.clone();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<String> = con.scan().await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn key_kind(&self, key: &str) -> Result<KeyKind, StoreError> {
        let mut con = self.connection.clone();
        let name: String = redis::cmd("TYPE").arg(key).query_async(&mut con).await?;
        Ok(KeyKind::from_type_name(&name))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut con = self.connection.clone();
        let _: () = con.set(key, value).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyEventSource for RedisStore {
    async fn subscribe_set_events(&self) -> Result<mpsc::Receiver<String>, StoreError> {
        self.enable_set_notifications().await?;

        let pattern = keyevent_pattern(self.db);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;
        info!("subscribed to {pattern}");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                if !msg.from_pattern() {
                    continue;
                }
                match msg.get_payload::<String>() {
                    Ok(key) => {
                        if tx.send(key).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unreadable keyevent payload: {e}"),
                }
            }
            debug!("keyevent reader for {pattern} stopped");
        });
        Ok(rx)
    }
}
