//! Infrastructure layer for redis-monitor.
//!
//! Everything that touches a socket or the store client lives here.
//!
//! # Responsibilities
//!
//! - Accepting push-channel connections and running the upgrade handshake
//! - One reader task and one writer task per connection
//! - Tracking open connections for broadcast
//! - Talking to Redis (GET/TYPE/SCAN/SET and keyevent subscriptions)
//! - Serving the browser UI and accepting write-backs over HTTP
//!
//! # What does NOT belong here?
//!
//! - Deciding which values changed (that is the application layer)
//! - Value parsing and the wire codec (that is `redis-monitor-core`)
//! - Configuration merging (that is done in `main.rs`)

pub mod connection;
pub mod http_server;
pub mod memory_store;
pub mod redis_store;
pub mod registry;
pub mod ws_server;

pub use http_server::{serve_http, HttpState};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use ws_server::{ProtocolServer, ServerSettings};
