//! Broadcaster: encode a message once and push it to every connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use redis_monitor_core::protocol::encode_json;
use redis_monitor_core::FrameError;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections that could not take the frame and were removed.
    pub dropped: usize,
}

/// Anything that can hand one encoded frame to a set of connections.
///
/// Implementations must not let one failing connection stop delivery to the
/// others.
#[async_trait]
pub trait FrameFanout: Send + Sync {
    async fn fan_out(&self, frame: Arc<[u8]>) -> FanoutReport;
}

/// Error type for broadcasts.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode broadcast: {0}")]
    Encode(#[from] FrameError),
}

/// Encodes values as text frames and fans them out.
#[derive(Clone)]
pub struct Broadcaster {
    targets: Arc<dyn FrameFanout>,
}

impl Broadcaster {
    pub fn new(targets: Arc<dyn FrameFanout>) -> Self {
        Self { targets }
    }

    /// Serializes `value` to JSON, frames it, and sends the same bytes to
    /// every registered connection.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if the value cannot be serialized;
    /// nothing is sent in that case.
    pub async fn broadcast<T>(&self, value: &T) -> Result<FanoutReport, BroadcastError>
    where
        T: Serialize + ?Sized,
    {
        let frame: Arc<[u8]> = encode_json(value)?.into();
        Ok(self.send_frame(frame).await)
    }

    /// Sends an already encoded frame to every registered connection.
    pub async fn send_frame(&self, frame: Arc<[u8]>) -> FanoutReport {
        let len = frame.len();
        let report = self.targets.fan_out(frame).await;
        debug!(
            bytes = len,
            delivered = report.delivered,
            "broadcast frame queued"
        );
        if report.dropped > 0 {
            warn!(dropped = report.dropped, "dropped connections that could not keep up");
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use redis_monitor_core::{decode_frame, parse_value, ChangeBatch, Decoded};
    use tokio::sync::Mutex;

    /// Test double that records every frame it is given.
    #[derive(Default)]
    struct RecordingFanout {
        frames: Mutex<Vec<Arc<[u8]>>>,
        connections: usize,
    }

    #[async_trait]
    impl FrameFanout for RecordingFanout {
        async fn fan_out(&self, frame: Arc<[u8]>) -> FanoutReport {
            self.frames.lock().await.push(frame);
            FanoutReport {
                delivered: self.connections,
                dropped: 0,
            }
        }
    }

    fn payload(frame: &[u8]) -> serde_json::Value {
        match decode_frame(frame).unwrap() {
            Decoded::Frame { frame, .. } => serde_json::from_slice(&frame.payload).unwrap(),
            Decoded::Terminate => panic!("unexpected terminate"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_encodes_batch_once() {
        // Arrange
        let fanout = Arc::new(RecordingFanout {
            connections: 3,
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(fanout.clone());
        let mut batch = ChangeBatch::new();
        batch.push("temp", parse_value("72.5"));

        // Act
        let report = broadcaster.broadcast(&batch).await.unwrap();

        // Assert
        assert_eq!(report.delivered, 3);
        let frames = fanout.frames.lock().await;
        assert_eq!(frames.len(), 1, "one encoded frame shared by all");
        assert_eq!(payload(&frames[0]), serde_json::json!([["temp", [[72.5]]]]));
    }

    #[tokio::test]
    async fn test_broadcast_rejects_unserializable_value() {
        let fanout = Arc::new(RecordingFanout::default());
        let broadcaster = Broadcaster::new(fanout.clone());
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);

        let result = broadcaster.broadcast(&bad).await;

        assert!(matches!(result, Err(BroadcastError::Encode(_))));
        assert!(fanout.frames.lock().await.is_empty());
    }
}
