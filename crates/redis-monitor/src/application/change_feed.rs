//! ChangeFeed: decides when and what to push.
//!
//! Two strategies share one output contract, a [`ChangeBatch`] handed to the
//! [`Broadcaster`]:
//!
//! - **Polling** ([`ChangeFeed::run_polling`]): every interval, scan all
//!   keys, keep the string-typed ones, and report those whose value differs
//!   from the last one pushed.
//! - **Subscribing** ([`ChangeFeed::run_subscribed`]): every `SET`
//!   notification triggers the same fetch-and-compare, but the result is
//!   appended to a pending batch.  A separate timer drains that batch once
//!   per interval, so bursts of writes collapse into one broadcast.
//!
//! New connections get a full, sorted snapshot from [`ChangeFeed::snapshot`]
//! regardless of what has been pushed before.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use redis_monitor_core::{parse_value, ChangeBatch, KeyValue, SnapshotCache};

use crate::application::broadcaster::Broadcaster;
use crate::application::store::{KeyKind, KeyValueStore, StoreError};
use crate::domain::config::SHUTDOWN_POLL_INTERVAL;

/// Change detection over one store.
///
/// One instance is shared (behind an `Arc`) by the feed loop and every
/// connection task; the cache and the pending batch each sit behind their
/// own lock.
pub struct ChangeFeed {
    store: Arc<dyn KeyValueStore>,
    cache: Mutex<SnapshotCache>,
    pending: Mutex<ChangeBatch>,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(SnapshotCache::new()),
            pending: Mutex::new(ChangeBatch::new()),
        }
    }

    // ── Change detection ─────────────────────────────────────────────────────

    /// Runs one polling cycle and returns the keys that changed since the
    /// previous push.
    ///
    /// Store failures never abort the cycle: a failed scan yields an empty
    /// batch, and a key whose `TYPE` or `GET` fails is skipped.
    pub async fn poll_once(&self) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        for key in self.string_keys().await {
            match self.fetch_change(&key).await {
                Ok(Some(value)) => batch.push(key, value),
                Ok(None) => {}
                Err(e) => warn!(key = %key, "skipping key: {e}"),
            }
        }
        batch
    }

    /// Handles one `SET` notification: if the key's value changed, queue it
    /// for the next drain.
    pub async fn record_event(&self, key: &str) {
        match self.fetch_change(key).await {
            Ok(Some(value)) => self.pending.lock().await.push(key, value),
            Ok(None) => {}
            Err(e) => warn!(key = %key, "skipping keyevent: {e}"),
        }
    }

    /// Takes every queued change, leaving the pending batch empty.
    pub async fn drain_pending(&self) -> ChangeBatch {
        self.pending.lock().await.drain()
    }

    /// Builds the batch a newly connected client receives: every string key
    /// with its current value, sorted by key name.
    ///
    /// The last-pushed cache is rebuilt from exactly the values returned, so
    /// the next cycle reports only what changes after this snapshot.  The
    /// cache lock is held throughout, which keeps a concurrent poll or
    /// keyevent from slipping between the read and the cache update.
    pub async fn snapshot(&self) -> ChangeBatch {
        let mut cache = self.cache.lock().await;
        cache.clear();

        let mut keys = self.string_keys().await;
        keys.sort();

        let mut batch = ChangeBatch::new();
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(raw)) => {
                    cache.observe(&key, &raw, false);
                    batch.push(key, parse_value(&raw));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, "leaving key out of snapshot: {e}"),
            }
        }
        batch
    }

    /// Reads `key` and returns its parsed value if it differs from the last
    /// one pushed.  Absent keys are never reported.
    ///
    /// The read happens under the cache lock so an older value can never
    /// overwrite one a concurrent snapshot has just recorded.
    async fn fetch_change(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut cache = self.cache.lock().await;
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let changed = cache.observe(key, &raw, true);
        Ok(changed.then(|| parse_value(&raw)))
    }

    /// Scans the store and keeps only string-typed keys.
    async fn string_keys(&self) -> Vec<String> {
        let keys = match self.store.scan_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("key scan failed: {e}");
                return Vec::new();
            }
        };

        let mut strings = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.key_kind(&key).await {
                Ok(KeyKind::String) => strings.push(key),
                Ok(_) => {}
                Err(e) => warn!(key = %key, "skipping key: {e}"),
            }
        }
        strings
    }

    // ── Feed loops ───────────────────────────────────────────────────────────

    /// Polls the store every `period` and broadcasts each non-empty batch,
    /// until `running` is cleared.
    pub async fn run_polling(
        self: Arc<Self>,
        broadcaster: Broadcaster,
        period: Duration,
        running: Arc<AtomicBool>,
    ) {
        info!(?period, "change feed polling");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first scan waits one period.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let batch = self.poll_once().await;
            publish(&broadcaster, batch).await;
        }
        debug!("polling loop stopped");
    }

    /// Listens for `SET` notifications on `events` and broadcasts the
    /// coalesced changes every `period`.
    ///
    /// Returns when `running` is cleared or the subscription closes.  There
    /// is no resubscription: once the channel is lost, changes are only
    /// visible through new-connection snapshots.
    pub async fn run_subscribed(
        self: Arc<Self>,
        mut events: mpsc::Receiver<String>,
        broadcaster: Broadcaster,
        period: Duration,
        running: Arc<AtomicBool>,
    ) {
        info!(?period, "change feed subscribed to set events");
        let drainer = tokio::spawn(Arc::clone(&self).run_drainer(
            broadcaster.clone(),
            period,
            Arc::clone(&running),
        ));

        while running.load(Ordering::Relaxed) {
            match timeout(SHUTDOWN_POLL_INTERVAL, events.recv()).await {
                Ok(Some(key)) => self.record_event(&key).await,
                Ok(None) => {
                    warn!("keyevent subscription closed; live updates stopped");
                    break;
                }
                Err(_) => {
                    // No notification within the poll window; re-check the flag.
                }
            }
        }

        drainer.abort();
        let rest = self.drain_pending().await;
        publish(&broadcaster, rest).await;
        debug!("subscription loop stopped");
    }

    async fn run_drainer(
        self: Arc<Self>,
        broadcaster: Broadcaster,
        period: Duration,
        running: Arc<AtomicBool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let batch = self.drain_pending().await;
            publish(&broadcaster, batch).await;
        }
    }
}

async fn publish(broadcaster: &Broadcaster, batch: ChangeBatch) {
    if batch.is_empty() {
        return;
    }
    debug!(keys = batch.len(), "broadcasting changes");
    if let Err(e) = broadcaster.broadcast(&batch).await {
        error!("{e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broadcaster::{FanoutReport, FrameFanout};
    use async_trait::async_trait;
    use redis_monitor_core::{decode_frame, Decoded};
    use serde_json::json;

    // ── Test doubles ─────────────────────────────────────────────────────────

    /// Store double that keeps keys in insertion order and can be told to
    /// fail on chosen keys.
    #[derive(Default)]
    struct ScriptedStore {
        entries: Mutex<Vec<(String, KeyKind, String)>>,
        failing_gets: Vec<String>,
        scan_fails: bool,
    }

    impl ScriptedStore {
        fn with(entries: &[(&str, &str)]) -> Self {
            let entries = entries
                .iter()
                .map(|(k, v)| (k.to_string(), KeyKind::String, v.to_string()))
                .collect();
            Self {
                entries: Mutex::new(entries),
                ..Self::default()
            }
        }

        async fn put(&self, key: &str, kind: KeyKind, value: &str) {
            let mut entries = self.entries.lock().await;
            match entries.iter_mut().find(|(k, _, _)| k == key) {
                Some(entry) => {
                    entry.1 = kind;
                    entry.2 = value.to_string();
                }
                None => entries.push((key.to_string(), kind, value.to_string())),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for ScriptedStore {
        async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
            if self.scan_fails {
                return Err(StoreError::Unavailable("scan disabled".to_string()));
            }
            Ok(self.entries.lock().await.iter().map(|(k, _, _)| k.clone()).collect())
        }

        async fn key_kind(&self, key: &str) -> Result<KeyKind, StoreError> {
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .find(|(k, _, _)| k == key)
                .map(|(_, kind, _)| *kind)
                .unwrap_or(KeyKind::Missing))
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            if self.failing_gets.iter().any(|k| k == key) {
                return Err(StoreError::Unavailable(format!("get {key}")));
            }
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .find(|(k, kind, _)| k == key && *kind == KeyKind::String)
                .map(|(_, _, v)| v.clone()))
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.put(key, KeyKind::String, value).await;
            Ok(())
        }
    }

    /// Fan-out double that records decoded JSON payloads.
    #[derive(Default)]
    struct RecordingFanout {
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl FrameFanout for RecordingFanout {
        async fn fan_out(&self, frame: Arc<[u8]>) -> FanoutReport {
            if let Ok(Decoded::Frame { frame, .. }) = decode_frame(&frame) {
                if let Ok(json) = serde_json::from_slice(&frame.payload) {
                    self.payloads.lock().await.push(json);
                }
            }
            FanoutReport {
                delivered: 1,
                dropped: 0,
            }
        }
    }

    fn to_json(batch: &ChangeBatch) -> serde_json::Value {
        serde_json::to_value(batch).unwrap()
    }

    // ── Polling ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_first_poll_reports_every_string_key() {
        // Arrange
        let store = ScriptedStore::with(&[("temp", "72.5"), ("status", "idle")]);
        store.put("queue", KeyKind::List, "").await;
        let feed = ChangeFeed::new(Arc::new(store));

        // Act
        let batch = feed.poll_once().await;

        // Assert
        assert_eq!(to_json(&batch), json!([["temp", [[72.5]]], ["status", "idle"]]));
    }

    #[tokio::test]
    async fn test_unchanged_key_is_not_reported_twice() {
        let feed = ChangeFeed::new(Arc::new(ScriptedStore::with(&[("temp", "72.5")])));

        let first = feed.poll_once().await;
        let second = feed.poll_once().await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty(), "unchanged key must not be reported again");
    }

    #[tokio::test]
    async fn test_only_changed_key_is_reported() {
        let store = Arc::new(ScriptedStore::with(&[("a", "1"), ("b", "2")]));
        let feed = ChangeFeed::new(store.clone());
        feed.poll_once().await;

        store.put("b", KeyKind::String, "3").await;
        let batch = feed.poll_once().await;

        assert_eq!(to_json(&batch), json!([["b", [[3.0]]]]));
    }

    #[tokio::test]
    async fn test_failing_key_does_not_stop_the_cycle() {
        let mut store = ScriptedStore::with(&[("bad", "1"), ("good", "2")]);
        store.failing_gets.push("bad".to_string());
        let feed = ChangeFeed::new(Arc::new(store));

        let batch = feed.poll_once().await;

        assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_failed_scan_yields_empty_batch() {
        let store = ScriptedStore {
            scan_fails: true,
            ..ScriptedStore::with(&[("a", "1")])
        };
        let feed = ChangeFeed::new(Arc::new(store));

        assert!(feed.poll_once().await.is_empty());
    }

    // ── Snapshot ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_snapshot_contains_every_key_sorted() {
        // Arrange: keys stored out of order and already pushed once.
        let feed = ChangeFeed::new(Arc::new(ScriptedStore::with(&[
            ("zeta", "1"),
            ("alpha", "hello world"),
            ("mid", "1 2;3 4"),
        ])));
        feed.poll_once().await;

        // Act
        let snapshot = feed.snapshot().await;

        // Assert
        assert_eq!(
            to_json(&snapshot),
            json!([
                ["alpha", "hello world"],
                ["mid", [[1.0, 2.0], [3.0, 4.0]]],
                ["zeta", [[1.0]]]
            ])
        );
    }

    #[tokio::test]
    async fn test_poll_after_snapshot_is_empty() {
        // Arrange: a new key appears after the last poll
        let store = Arc::new(ScriptedStore::with(&[("a", "1"), ("b", "2")]));
        let feed = ChangeFeed::new(store.clone());
        feed.poll_once().await;
        store.put("c", KeyKind::String, "3").await;

        // Act
        let snapshot = feed.snapshot().await;
        let next = feed.poll_once().await;

        // Assert
        assert_eq!(snapshot.len(), 3);
        assert!(next.is_empty(), "snapshot values must not be pushed again");
    }

    #[tokio::test]
    async fn test_poll_after_snapshot_reports_only_the_changed_key() {
        let store = Arc::new(ScriptedStore::with(&[("hum", "40"), ("temp", "72.5")]));
        let feed = ChangeFeed::new(store.clone());
        feed.poll_once().await;
        feed.snapshot().await;

        store.put("temp", KeyKind::String, "73.0").await;
        let batch = feed.poll_once().await;

        assert_eq!(to_json(&batch), json!([["temp", [[73.0]]]]));
    }

    #[tokio::test]
    async fn test_event_after_snapshot_skips_unchanged_key() {
        let store = Arc::new(ScriptedStore::with(&[("a", "1")]));
        let feed = ChangeFeed::new(store.clone());
        feed.snapshot().await;

        feed.record_event("a").await;

        assert!(feed.drain_pending().await.is_empty());
    }

    // ── Subscribe path ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_events_accumulate_until_drained() {
        let store = Arc::new(ScriptedStore::with(&[("a", "1"), ("b", "x")]));
        let feed = ChangeFeed::new(store.clone());

        feed.record_event("a").await;
        feed.record_event("b").await;
        feed.record_event("a").await; // unchanged, skipped

        let drained = feed.drain_pending().await;
        assert_eq!(to_json(&drained), json!([["a", [[1.0]]], ["b", "x"]]));
        assert!(feed.drain_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_event_for_deleted_key_is_ignored() {
        let feed = ChangeFeed::new(Arc::new(ScriptedStore::default()));

        feed.record_event("gone").await;

        assert!(feed.drain_pending().await.is_empty());
    }

    // ── Loops ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_polling_loop_broadcasts_changes() {
        // Arrange
        let store = Arc::new(ScriptedStore::with(&[("temp", "72.5")]));
        let fanout = Arc::new(RecordingFanout::default());
        let feed = Arc::new(ChangeFeed::new(store.clone()));
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(Arc::clone(&feed).run_polling(
            Broadcaster::new(fanout.clone()),
            Duration::from_millis(20),
            Arc::clone(&running),
        ));

        // Act
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.put("temp", KeyKind::String, "73.0").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        running.store(false, Ordering::Relaxed);
        task.await.unwrap();

        // Assert: one batch per change, never a batch for an unchanged cycle.
        let payloads = fanout.payloads.lock().await;
        assert_eq!(
            *payloads,
            vec![json!([["temp", [[72.5]]]]), json!([["temp", [[73.0]]]])]
        );
    }

    #[tokio::test]
    async fn test_subscribed_loop_coalesces_bursts() {
        // Arrange
        let store = Arc::new(ScriptedStore::with(&[("a", "1"), ("b", "2")]));
        let fanout = Arc::new(RecordingFanout::default());
        let feed = Arc::new(ChangeFeed::new(store.clone()));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(Arc::clone(&feed).run_subscribed(
            rx,
            Broadcaster::new(fanout.clone()),
            Duration::from_millis(150),
            Arc::clone(&running),
        ));

        // Act: a burst well inside one drain period.
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        running.store(false, Ordering::Relaxed);
        task.await.unwrap();

        // Assert
        let payloads = fanout.payloads.lock().await;
        assert_eq!(*payloads, vec![json!([["a", [[1.0]]], ["b", [[2.0]]]])]);
    }

    #[tokio::test]
    async fn test_subscribed_loop_flushes_when_channel_closes() {
        let fanout = Arc::new(RecordingFanout::default());
        let feed = Arc::new(ChangeFeed::new(Arc::new(ScriptedStore::with(&[("a", "1")]))));
        let (tx, rx) = mpsc::channel(4);

        tx.send("a".to_string()).await.unwrap();
        drop(tx);
        Arc::clone(&feed)
            .run_subscribed(
                rx,
                Broadcaster::new(fanout.clone()),
                Duration::from_secs(60),
                Arc::new(AtomicBool::new(true)),
            )
            .await;

        assert_eq!(*fanout.payloads.lock().await, vec![json!([["a", [[1.0]]]])]);
    }
}
