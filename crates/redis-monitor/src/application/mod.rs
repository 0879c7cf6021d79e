//! Application layer for redis-monitor.
//!
//! Knows *what* to push and *when*, but reaches the store and the connected
//! browsers only through the traits defined here.
//!
//! # Responsibilities
//!
//! - Detecting changed values (polling or keyevent subscription)
//! - Building the full snapshot a new connection receives
//! - Encoding a batch once and fanning it out to every connection

pub mod broadcaster;
pub mod change_feed;
pub mod monitor;
pub mod store;

pub use broadcaster::{BroadcastError, Broadcaster, FanoutReport, FrameFanout};
pub use change_feed::ChangeFeed;
pub use monitor::{ConnectionHandler, ConnectionId, MonitorHandler};
pub use store::{KeyEventSource, KeyKind, KeyValueStore, StoreError};
