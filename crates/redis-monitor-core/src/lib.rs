//! # redis-monitor-core
//!
//! Shared library for redis-monitor containing the push-channel wire codec,
//! the upgrade handshake, and the change-feed domain types.
//!
//! It has zero dependencies on sockets, async runtimes, or the key-value
//! store client.  Everything here is a pure function or a plain data type,
//! so it can be tested and benchmarked in isolation.
//!
//! # Architecture overview
//!
//! redis-monitor pushes live values from a key-value store to browsers.  The
//! server side is split into two crates; this one is the foundation:
//!
//! - **`protocol`** – How bytes travel over the push channel.  A minimal
//!   subset of the WebSocket protocol: the HTTP upgrade handshake plus
//!   single, unfragmented text frames.
//!
//! - **`domain`** – What gets pushed.  Raw store values are parsed into
//!   numeric matrices or kept as strings, a snapshot cache suppresses
//!   redundant updates, and change batches carry `(key, value)` pairs to
//!   the browser as JSON.

pub mod domain;
pub mod protocol;

pub use domain::batch::ChangeBatch;
pub use domain::snapshot::SnapshotCache;
pub use domain::value::{parse_value, Cell, KeyValue, ValueParseError};
pub use protocol::frame::{decode_frame, encode_frame, Decoded, Frame, FrameError, Opcode};
pub use protocol::handshake::{accept_token, HandshakeError};
