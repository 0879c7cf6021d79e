//! Domain layer: what the change feed observes and pushes.
//!
//! Pure types with no I/O.  The server crate owns the store, the timers and
//! the locks; this layer only decides what a value looks like on the wire
//! and whether it changed.

pub mod batch;
pub mod snapshot;
pub mod value;

pub use batch::ChangeBatch;
pub use snapshot::SnapshotCache;
pub use value::{parse_value, to_store_string, try_parse_matrix, Cell, KeyValue, ValueParseError};
