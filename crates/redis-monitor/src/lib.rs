//! redis-monitor library crate.
//!
//! This crate serves live key-value store contents to web browsers.  Browsers
//! load a small UI over HTTP, open a push channel (a minimal WebSocket
//! subset), and from then on receive every change to a string key as it is
//! detected.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Redis ──(SCAN/GET/TYPE or keyevent pub/sub)──┐
//!                                              ↓
//! [redis-monitor]
//!   ├── domain/            MonitorConfig, FeedMode, TOML file layer
//!   ├── application/
//!   │     ├── store/        Store contract (KeyValueStore, KeyEventSource)
//!   │     ├── change_feed/  Poll / subscribe strategies, snapshots
//!   │     ├── broadcaster/  Encode once, fan out to every client
//!   │     └── monitor/      Per-connection hooks (snapshot on connect)
//!   └── infrastructure/
//!         ├── ws_server/    Accept loop, handshake, receive loop
//!         ├── registry/     Mutex-guarded set of open connections
//!         ├── redis_store/  Redis implementation of the store contract
//!         ├── memory_store/ In-process implementation of the same contract
//!         └── http_server/  Static UI assets and browser write-back
//!                                              ↓
//! Browser  (JSON text frames: [["key", value], ...])
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no network I/O and no async code.
//! - `application` talks to the store and to connected clients only through
//!   the traits it defines ([`application::store::KeyValueStore`],
//!   [`application::broadcaster::FrameFanout`],
//!   [`application::monitor::ConnectionHandler`]).
//! - `infrastructure` implements those traits with `tokio`, `redis` and
//!   `axum`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: change detection and fan-out logic.
pub mod application;

/// Infrastructure layer: sockets, the Redis client and the HTTP server.
pub mod infrastructure;
