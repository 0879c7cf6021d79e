//! Monitor configuration types.
//!
//! [`MonitorConfig`] holds every runtime setting.  It starts from
//! [`MonitorConfig::default`], is optionally overlaid with a TOML file (see
//! [`crate::domain::file_config`]), and finally with command-line flags in
//! `main.rs`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// How often long-running loops re-check the shutdown flag while idle.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How the change feed learns about modified keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Scan every key on a fixed interval and diff against the last values.
    #[default]
    Poll,
    /// Subscribe to keyevent notifications for `SET` and coalesce them into
    /// one broadcast per interval.
    Subscribe,
}

impl FeedMode {
    /// Maps the boolean `realtime` switch used by the CLI and the config
    /// file onto a mode.
    pub fn from_realtime(realtime: bool) -> Self {
        if realtime {
            FeedMode::Subscribe
        } else {
            FeedMode::Poll
        }
    }
}

/// Location of the Redis server and the logical database to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl RedisConfig {
    /// Connection URL in the form accepted by `redis::Client::open`.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
        }
    }
}

/// All runtime configuration for the monitor.
///
/// # Example
///
/// ```rust
/// use redis_monitor::domain::MonitorConfig;
///
/// let cfg = MonitorConfig::default();
/// assert_eq!(cfg.http_bind_addr.port(), 8000);
/// assert_eq!(cfg.ws_bind_addr.port(), 8001);
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Address the HTTP server (UI assets and write-back) binds to.
    pub http_bind_addr: SocketAddr,

    /// Address the push-channel server binds to.  Its port is also injected
    /// into the served UI script so the browser knows where to connect.
    pub ws_bind_addr: SocketAddr,

    pub redis: RedisConfig,

    /// Poll period in poll mode, drain period in subscribe mode.
    pub refresh_interval: Duration,

    pub mode: FeedMode,

    /// Directory the HTTP server serves files from.
    pub web_root: PathBuf,

    /// Frames that may wait in one connection's outbound queue before the
    /// connection is considered too slow and dropped.
    pub outbound_queue: usize,

    /// Upper bound on a single socket write.
    pub write_timeout: Duration,

    /// Closes a connection that sends nothing for this long.  `None` keeps
    /// silent connections open, which is the normal case for browsers.
    pub idle_timeout: Option<Duration>,

    /// Upper bound on receiving the complete upgrade request.
    pub handshake_timeout: Duration,
}

impl Default for MonitorConfig {
    /// | Field             | Default            |
    /// |-------------------|--------------------|
    /// | http_bind_addr    | `0.0.0.0:8000`     |
    /// | ws_bind_addr      | `0.0.0.0:8001`     |
    /// | redis             | `localhost:6379/0` |
    /// | refresh_interval  | 500 ms             |
    /// | mode              | poll               |
    /// | web_root          | `web`              |
    /// | outbound_queue    | 64 frames          |
    /// | write_timeout     | 5 seconds          |
    /// | idle_timeout      | disabled           |
    /// | handshake_timeout | 5 seconds          |
    fn default() -> Self {
        Self {
            http_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)),
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8001)),
            redis: RedisConfig::default(),
            refresh_interval: Duration::from_millis(500),
            mode: FeedMode::Poll,
            web_root: PathBuf::from("web"),
            outbound_queue: 64,
            write_timeout: Duration::from_secs(5),
            idle_timeout: None,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.http_bind_addr.port(), 8000);
        assert_eq!(cfg.ws_bind_addr.port(), 8001);
    }

    #[test]
    fn test_default_refresh_interval_is_half_a_second() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.refresh_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_default_mode_is_poll() {
        assert_eq!(MonitorConfig::default().mode, FeedMode::Poll);
    }

    #[test]
    fn test_idle_timeout_disabled_by_default() {
        // Browsers never send frames on this channel, so a read timeout
        // would disconnect every healthy client.
        assert_eq!(MonitorConfig::default().idle_timeout, None);
    }

    #[test]
    fn test_redis_url_includes_db() {
        let redis = RedisConfig {
            host: "10.0.0.5".to_string(),
            port: 6380,
            db: 3,
        };
        assert_eq!(redis.url(), "redis://10.0.0.5:6380/3");
    }

    #[test]
    fn test_default_redis_url() {
        assert_eq!(RedisConfig::default().url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_feed_mode_from_realtime_flag() {
        assert_eq!(FeedMode::from_realtime(true), FeedMode::Subscribe);
        assert_eq!(FeedMode::from_realtime(false), FeedMode::Poll);
    }
}
