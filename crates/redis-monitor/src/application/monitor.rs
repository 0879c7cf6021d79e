//! Connection strategy: what the push-channel server does at each point of a
//! connection's life.
//!
//! The server owns sockets and framing; everything application-specific goes
//! through [`ConnectionHandler`].  [`MonitorHandler`] is the implementation
//! used by the binary: it sends each new client a full snapshot and ignores
//! anything the client sends.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};
use uuid::Uuid;

use redis_monitor_core::protocol::encode_json;
use redis_monitor_core::Frame;

use crate::application::change_feed::ChangeFeed;

/// Unique identifier of one accepted push-channel connection.
pub type ConnectionId = Uuid;

/// Hooks invoked by the push-channel server.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called once the handshake has completed and before the connection is
    /// registered for broadcasts.  A returned frame is sent to this
    /// connection only, ahead of any broadcast.
    async fn on_connect(&self, id: ConnectionId, peer: SocketAddr) -> Option<Vec<u8>>;

    /// Called for every application frame the client sends while open.
    async fn on_message(&self, id: ConnectionId, frame: Frame);

    /// Called after the connection has left the registry.
    async fn on_disconnect(&self, _id: ConnectionId) {}
}

/// Handler that greets every connection with a snapshot of the store.
pub struct MonitorHandler {
    feed: Arc<ChangeFeed>,
}

impl MonitorHandler {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ConnectionHandler for MonitorHandler {
    async fn on_connect(&self, id: ConnectionId, peer: SocketAddr) -> Option<Vec<u8>> {
        let snapshot = self.feed.snapshot().await;
        info!(conn = %id, %peer, keys = snapshot.len(), "sending initial snapshot");
        match encode_json(&snapshot) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(conn = %id, "failed to encode snapshot: {e}");
                None
            }
        }
    }

    async fn on_message(&self, id: ConnectionId, frame: Frame) {
        debug!(
            conn = %id,
            opcode = ?frame.opcode,
            bytes = frame.payload.len(),
            "client frame ignored"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
