//! ConnectionRegistry: the set of open push-channel connections.
//!
//! Every public method takes the registry lock for its whole duration, so
//! each one is atomic with respect to the others and the lock itself is
//! never exposed.  Only connections that completed the handshake are ever
//! inserted.
//!
//! The registry does not own sockets.  It holds each connection's outbound
//! queue sender; the connection's writer task owns the socket half and
//! drains the queue.  Broadcasting is therefore a non-blocking enqueue per
//! connection, and the lock is never held across socket I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::{debug, warn};

use crate::application::broadcaster::{FanoutReport, FrameFanout};
use crate::application::monitor::ConnectionId;

/// What the registry keeps for one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Arc<[u8]>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: SocketAddr, outbound: mpsc::Sender<Arc<[u8]>>) -> Self {
        Self { id, peer, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Mutex-guarded map of open connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection.  Returns `false` (and keeps the existing entry) if
    /// the id is already registered.
    pub async fn insert(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&handle.id) {
            return false;
        }
        connections.insert(handle.id, handle);
        true
    }

    /// Removes a connection, returning its handle if it was registered.
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.lock().await.remove(&id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Ids of all registered connections, in no particular order.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().await.keys().copied().collect()
    }

    /// Queues `frame` for every registered connection.
    ///
    /// A connection whose queue is full (a client that stopped reading) or
    /// closed (its writer already exited) is removed before the lock is
    /// released; the others still receive the frame.  Dropping the removed
    /// handle closes that connection's queue, which ends its writer task.
    pub async fn broadcast(&self, frame: Arc<[u8]>) -> FanoutReport {
        let mut connections = self.connections.lock().await;
        let mut delivered = 0;
        let mut stale = Vec::new();

        for (id, handle) in connections.iter() {
            match handle.outbound.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn = %id, peer = %handle.peer, "outbound queue full; dropping connection");
                    stale.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn = %id, peer = %handle.peer, "connection already closed");
                    stale.push(*id);
                }
            }
        }

        for id in &stale {
            connections.remove(id);
        }

        FanoutReport {
            delivered,
            dropped: stale.len(),
        }
    }
}

#[async_trait]
impl FrameFanout for ConnectionRegistry {
    async fn fan_out(&self, frame: Arc<[u8]>) -> FanoutReport {
        self.broadcast(frame).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
