//! Optional TOML configuration file.
//!
//! Every field is optional; whatever is present overrides the built-in
//! default, and command-line flags override the file in turn.
//!
//! ```toml
//! log_level = "debug"
//! realtime = true
//! refresh_rate = 0.25
//!
//! [http]
//! port = 8000
//! web_root = "web"
//!
//! [ws]
//! port = 8001
//! outbound_queue = 128
//! write_timeout = 2.0
//!
//! [redis]
//! host = "localhost"
//! port = 6379
//! db = 0
//! ```
//!
//! Durations are given in (fractional) seconds.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::config::{FeedMode, MonitorConfig};

/// Error type for loading and applying the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A bind address is not a valid IP address.
    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),

    /// A duration is negative, not finite, or too large.
    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: f64 },
}

// ── File schema ───────────────────────────────────────────────────────────────

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_level: Option<String>,
    /// `true` selects subscribe mode, `false` poll mode.
    pub realtime: Option<bool>,
    /// Refresh interval in seconds.
    pub refresh_rate: Option<f64>,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub ws: WsSection,
    #[serde(default)]
    pub redis: RedisSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub web_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WsSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub outbound_queue: Option<usize>,
    pub write_timeout: Option<f64>,
    pub idle_timeout: Option<f64>,
    pub handshake_timeout: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RedisSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<i64>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the configuration file at `path`.
///
/// Unlike a platform config file, this one is only read when the user
/// names it, so a missing file is an error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed or has unknown fields.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

impl FileConfig {
    /// Overlays every field present in the file onto `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] or
    /// [`ConfigError::InvalidDuration`] for values that parse as TOML but
    /// are not usable.
    pub fn apply(&self, config: &mut MonitorConfig) -> Result<(), ConfigError> {
        if let Some(realtime) = self.realtime {
            config.mode = FeedMode::from_realtime(realtime);
        }
        if let Some(secs) = self.refresh_rate {
            config.refresh_interval = positive_seconds("refresh_rate", secs)?;
        }

        apply_addr(&mut config.http_bind_addr, &self.http.bind, self.http.port)?;
        if let Some(root) = &self.http.web_root {
            config.web_root = root.clone();
        }

        apply_addr(&mut config.ws_bind_addr, &self.ws.bind, self.ws.port)?;
        if let Some(depth) = self.ws.outbound_queue {
            config.outbound_queue = depth.max(1);
        }
        if let Some(secs) = self.ws.write_timeout {
            config.write_timeout = seconds("ws.write_timeout", secs)?;
        }
        if let Some(secs) = self.ws.idle_timeout {
            // Zero disables the idle timeout.
            config.idle_timeout = match seconds("ws.idle_timeout", secs)? {
                d if d.is_zero() => None,
                d => Some(d),
            };
        }
        if let Some(secs) = self.ws.handshake_timeout {
            config.handshake_timeout = seconds("ws.handshake_timeout", secs)?;
        }

        if let Some(host) = &self.redis.host {
            config.redis.host = host.clone();
        }
        if let Some(port) = self.redis.port {
            config.redis.port = port;
        }
        if let Some(db) = self.redis.db {
            config.redis.db = db;
        }
        Ok(())
    }
}

/// Replaces the IP and/or port of `addr` with whichever of them is given.
pub fn apply_addr(
    addr: &mut SocketAddr,
    bind: &Option<String>,
    port: Option<u16>,
) -> Result<(), ConfigError> {
    if let Some(bind) = bind {
        let ip: IpAddr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(bind.clone()))?;
        addr.set_ip(ip);
    }
    if let Some(port) = port {
        addr.set_port(port);
    }
    Ok(())
}

/// Converts fractional seconds to a [`Duration`].
pub fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

/// Like [`seconds`], but zero is rejected as well.
pub fn positive_seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    match seconds(field, value)? {
        d if d.is_zero() => Err(ConfigError::InvalidDuration { field, value }),
        d => Ok(d),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_changes_nothing() {
        // Arrange
        let file: FileConfig = toml::from_str("").unwrap();
        let mut cfg = MonitorConfig::default();

        // Act
        file.apply(&mut cfg).unwrap();

        // Assert
        assert_eq!(cfg.ws_bind_addr, MonitorConfig::default().ws_bind_addr);
        assert_eq!(cfg.mode, FeedMode::Poll);
    }

    #[test]
    fn test_full_file_overrides_every_section() {
        let file: FileConfig = toml::from_str(
            r#"
            log_level = "debug"
            realtime = true
            refresh_rate = 0.25

            [http]
            bind = "127.0.0.1"
            port = 9000
            web_root = "/srv/ui"

            [ws]
            port = 9001
            outbound_queue = 8
            write_timeout = 1.5
            idle_timeout = 30.0
            handshake_timeout = 2.0

            [redis]
            host = "cache.local"
            port = 6380
            db = 2
            "#,
        )
        .unwrap();
        let mut cfg = MonitorConfig::default();

        file.apply(&mut cfg).unwrap();

        assert_eq!(file.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.mode, FeedMode::Subscribe);
        assert_eq!(cfg.refresh_interval, Duration::from_millis(250));
        assert_eq!(cfg.http_bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.web_root, PathBuf::from("/srv/ui"));
        assert_eq!(cfg.ws_bind_addr.port(), 9001);
        assert_eq!(cfg.outbound_queue, 8);
        assert_eq!(cfg.write_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(2));
        assert_eq!(cfg.redis.url(), "redis://cache.local:6380/2");
    }

    #[test]
    fn test_zero_idle_timeout_disables_it() {
        let file: FileConfig = toml::from_str("[ws]\nidle_timeout = 0.0").unwrap();
        let mut cfg = MonitorConfig {
            idle_timeout: Some(Duration::from_secs(10)),
            ..MonitorConfig::default()
        };

        file.apply(&mut cfg).unwrap();

        assert_eq!(cfg.idle_timeout, None);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("refresh = 1.0");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_bind_address_returns_error() {
        let file: FileConfig = toml::from_str("[http]\nbind = \"not.an.ip\"").unwrap();
        let mut cfg = MonitorConfig::default();

        let result = file.apply(&mut cfg);

        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_negative_refresh_rate_returns_error() {
        let file: FileConfig = toml::from_str("refresh_rate = -1.0").unwrap();
        let mut cfg = MonitorConfig::default();

        let result = file.apply(&mut cfg);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration {
                field: "refresh_rate",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_refresh_rate_returns_error() {
        let file: FileConfig = toml::from_str("refresh_rate = 0.0").unwrap();
        let mut cfg = MonitorConfig::default();

        assert!(file.apply(&mut cfg).is_err());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = load_file_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis-monitor.toml");
        std::fs::write(&path, "[redis]\ndb = 5\n").unwrap();

        let file = load_file_config(&path).unwrap();

        assert_eq!(file.redis.db, Some(5));
    }
}
