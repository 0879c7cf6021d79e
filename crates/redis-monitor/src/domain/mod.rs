//! Domain layer for redis-monitor.
//!
//! Plain configuration types with defaults.  Reading files, parsing the
//! command line and talking to the store all happen elsewhere; these structs
//! are the single place the rest of the crate looks for runtime settings.

pub mod config;
pub mod file_config;

pub use config::{FeedMode, MonitorConfig, RedisConfig, SHUTDOWN_POLL_INTERVAL};
pub use file_config::{load_file_config, ConfigError, FileConfig};
