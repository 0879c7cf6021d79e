//! Per-connection lifecycle: `Connecting → Open → Closed`.
//!
//! A connection starts in `Connecting` when the socket is accepted, becomes
//! `Open` once the upgrade handshake succeeds, and ends in `Closed`, which
//! is terminal.  A failed handshake goes straight from `Connecting` to
//! `Closed` and the connection is never registered.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;
use uuid::Uuid;

use crate::application::monitor::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Returned when a transition is not allowed from the current state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Why an open connection ended.  Logged once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the TCP stream.
    PeerClosed,
    /// The peer sent a close frame (or the bare "going away" status).
    CloseRequested,
    /// The peer sent bytes that are not a valid frame, or a frame larger
    /// than the inbound limit.
    ProtocolError(String),
    ReadFailed(String),
    /// Nothing arrived within the configured idle timeout.
    IdleTimeout,
    WriteFailed(String),
    WriteTimedOut,
    /// The registry dropped the connection because it could not keep up.
    Evicted,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed the stream"),
            CloseReason::CloseRequested => write!(f, "peer requested close"),
            CloseReason::ProtocolError(e) => write!(f, "protocol error: {e}"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::WriteTimedOut => write!(f, "write timed out"),
            CloseReason::Evicted => write!(f, "evicted (outbound queue full)"),
        }
    }
}

/// Identity and lifecycle state of one accepted socket.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
}

impl Connection {
    /// A freshly accepted connection, not yet upgraded.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: ConnectionState::Connecting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Marks the handshake as complete.
    ///
    /// # Errors
    ///
    /// Only a `Connecting` connection can open.
    pub fn open(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Open;
                Ok(())
            }
            from => Err(TransitionError {
                from,
                to: ConnectionState::Open,
            }),
        }
    }

    /// Moves to `Closed`.  Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new(SocketAddr::from(([127, 0, 0, 1], 1234)))
    }

    #[test]
    fn test_new_connection_is_connecting() {
        let c = conn();
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert!(!c.is_open());
    }

    #[test]
    fn test_connecting_opens_then_closes() {
        let mut c = conn();
        c.open().unwrap();
        assert!(c.is_open());
        assert!(c.close());
        assert_eq!(c.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_failed_handshake_closes_from_connecting() {
        let mut c = conn();
        assert!(c.close());
        assert_eq!(c.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut c = conn();
        c.close();
        assert!(!c.close());
        assert_eq!(
            c.open(),
            Err(TransitionError {
                from: ConnectionState::Closed,
                to: ConnectionState::Open
            })
        );
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut c = conn();
        c.open().unwrap();
        assert!(c.open().is_err());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::CloseRequested.to_string(), "peer requested close");
        assert_eq!(
            CloseReason::ReadFailed("reset".to_string()).to_string(),
            "read failed: reset"
        );
    }
}
