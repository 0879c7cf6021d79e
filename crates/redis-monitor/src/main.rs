//! redis-monitor: entry point.
//!
//! Serves a browser UI over HTTP and pushes live Redis values to every open
//! page over a WebSocket push channel.
//!
//! # Usage
//!
//! ```text
//! redis-monitor [OPTIONS]
//!
//! Options:
//!   --config        <FILE>  Optional TOML config file
//!   --http-port     <PORT>  HTTP (UI) port                [default: 8000]
//!   --ws-port       <PORT>  Push-channel port             [default: 8001]
//!   --redis-host    <HOST>  Redis host                    [default: localhost]
//!   --redis-port    <PORT>  Redis port                    [default: 6379]
//!   --redis-db      <N>     Redis logical database        [default: 0]
//!   --refresh-rate  <SECS>  Poll / drain interval         [default: 0.5]
//!   --realtime              Use keyevent subscriptions instead of polling
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then command-line flags.
//! Every flag can also be given as a `REDIS_MONITOR_*` environment
//! variable (e.g. `REDIS_MONITOR_WS_PORT=9001`).
//!
//! # Architecture overview
//!
//! ```text
//!  Browser ──HTTP──▶ http_server   (UI assets, POST write-back)
//!     ▲                   │
//!     │                   ▼
//!     └──push── ws_server ◀── Broadcaster ◀── ChangeFeed ◀── Redis
//!                   │                              ▲
//!                   └── on connect: snapshot ──────┘
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redis_monitor::application::{
    Broadcaster, ChangeFeed, ConnectionHandler, KeyEventSource, MonitorHandler,
};
use redis_monitor::domain::file_config::{apply_addr, positive_seconds, seconds};
use redis_monitor::domain::{
    load_file_config, ConfigError, FeedMode, FileConfig, MonitorConfig,
};
use redis_monitor::infrastructure::{
    serve_http, ConnectionRegistry, HttpState, ProtocolServer, RedisStore, ServerSettings,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Live Redis value monitor.
///
/// Every option is optional; anything left unset falls back to the config
/// file and then to the built-in default.
#[derive(Debug, Parser)]
#[command(
    name = "redis-monitor",
    about = "Watch live Redis values from the browser",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "REDIS_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port for the HTTP server (UI assets and write-back).
    #[arg(long, env = "REDIS_MONITOR_HTTP_PORT")]
    http_port: Option<u16>,

    /// IP address to bind the HTTP server to.
    #[arg(long, env = "REDIS_MONITOR_HTTP_BIND")]
    http_bind: Option<String>,

    /// TCP port for the push channel.
    ///
    /// The UI script is served with this port filled in, so browsers always
    /// connect to the right place.
    #[arg(long, env = "REDIS_MONITOR_WS_PORT")]
    ws_port: Option<u16>,

    /// IP address to bind the push channel to.
    #[arg(long, env = "REDIS_MONITOR_WS_BIND")]
    ws_bind: Option<String>,

    /// Redis hostname.
    #[arg(long, env = "REDIS_MONITOR_REDIS_HOST")]
    redis_host: Option<String>,

    /// Redis port.
    #[arg(long, env = "REDIS_MONITOR_REDIS_PORT")]
    redis_port: Option<u16>,

    /// Redis logical database index.
    #[arg(long, env = "REDIS_MONITOR_REDIS_DB")]
    redis_db: Option<i64>,

    /// Poll interval (poll mode) or drain interval (realtime mode), in
    /// seconds.
    #[arg(long, env = "REDIS_MONITOR_REFRESH_RATE")]
    refresh_rate: Option<f64>,

    /// Subscribe to `SET` keyevents instead of scanning every key.
    ///
    /// Requires permission to run `CONFIG SET notify-keyspace-events`.
    #[arg(long, env = "REDIS_MONITOR_REALTIME")]
    realtime: bool,

    /// Directory the UI is served from.
    #[arg(long, env = "REDIS_MONITOR_WEB_ROOT")]
    web_root: Option<PathBuf>,

    /// Frames queued per connection before it is dropped as too slow.
    #[arg(long, env = "REDIS_MONITOR_OUTBOUND_QUEUE")]
    outbound_queue: Option<usize>,

    /// Upper bound on one socket write, in seconds.
    #[arg(long, env = "REDIS_MONITOR_WRITE_TIMEOUT")]
    write_timeout: Option<f64>,

    /// Close connections that send nothing for this many seconds (0 = never).
    #[arg(long, env = "REDIS_MONITOR_IDLE_TIMEOUT")]
    idle_timeout: Option<f64>,

    /// Upper bound on receiving the upgrade request, in seconds.
    #[arg(long, env = "REDIS_MONITOR_HANDSHAKE_TIMEOUT")]
    handshake_timeout: Option<f64>,
}

impl Cli {
    /// Builds the runtime configuration: defaults, then `file`, then the
    /// flags that were given.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable bind address or a negative,
    /// non-finite (or, for the refresh rate, zero) duration.
    fn into_monitor_config(self, file: &FileConfig) -> Result<MonitorConfig, ConfigError> {
        let mut config = MonitorConfig::default();
        file.apply(&mut config)?;

        apply_addr(&mut config.http_bind_addr, &self.http_bind, self.http_port)?;
        apply_addr(&mut config.ws_bind_addr, &self.ws_bind, self.ws_port)?;

        if let Some(host) = self.redis_host {
            config.redis.host = host;
        }
        if let Some(port) = self.redis_port {
            config.redis.port = port;
        }
        if let Some(db) = self.redis_db {
            config.redis.db = db;
        }

        if let Some(secs) = self.refresh_rate {
            config.refresh_interval = positive_seconds("--refresh-rate", secs)?;
        }
        if self.realtime {
            config.mode = FeedMode::Subscribe;
        }
        if let Some(root) = self.web_root {
            config.web_root = root;
        }

        if let Some(depth) = self.outbound_queue {
            config.outbound_queue = depth.max(1);
        }
        if let Some(secs) = self.write_timeout {
            config.write_timeout = seconds("--write-timeout", secs)?;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout = match seconds("--idle-timeout", secs)? {
                d if d.is_zero() => None,
                d => Some(d),
            };
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = seconds("--handshake-timeout", secs)?;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and the optional config file is loaded.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, falling back to
///    the file's `log_level` and then to `info`.
/// 3. Redis is connected; failure here aborts the process.
/// 4. The push-channel listener is bound, then the HTTP server and the
///    change feed are spawned.
/// 5. Ctrl+C clears the shared `running` flag; every loop notices within
///    one shutdown poll interval or one refresh tick.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_file_config(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => FileConfig::default(),
    };

    // ── Logging setup ─────────────────────────────────────────────────────────
    let fallback = file.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let config = cli
        .into_monitor_config(&file)
        .context("invalid configuration")?;
    info!(
        "redis-monitor starting: http={}, ws={}, redis={}, mode={:?}, refresh={:?}",
        config.http_bind_addr,
        config.ws_bind_addr,
        config.redis.url(),
        config.mode,
        config.refresh_interval
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Wiring ─────────────────────────────────────────────────────────────────
    let store = Arc::new(
        RedisStore::connect(&config.redis)
            .await
            .context("failed to connect to Redis")?,
    );
    let feed = Arc::new(ChangeFeed::new(store.clone()));
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Broadcaster::new(registry.clone());
    let handler: Arc<dyn ConnectionHandler> = Arc::new(MonitorHandler::new(Arc::clone(&feed)));

    let ws_server = ProtocolServer::bind(
        config.ws_bind_addr,
        registry,
        handler,
        ServerSettings::from(&config),
    )
    .await?;

    let http_state = HttpState {
        web_root: Arc::new(config.web_root.clone()),
        ws_port: ws_server.local_addr()?.port(),
        store: store.clone(),
    };
    let http_task = tokio::spawn(serve_http(
        config.http_bind_addr,
        http_state,
        Arc::clone(&running),
    ));

    let feed_task = match config.mode {
        FeedMode::Poll => tokio::spawn(feed.run_polling(
            broadcaster,
            config.refresh_interval,
            Arc::clone(&running),
        )),
        FeedMode::Subscribe => {
            let events = store
                .subscribe_set_events()
                .await
                .context("failed to subscribe to keyevent notifications")?;
            tokio::spawn(feed.run_subscribed(
                events,
                broadcaster,
                config.refresh_interval,
                Arc::clone(&running),
            ))
        }
    };

    // ── Main server loop ───────────────────────────────────────────────────────
    let served = ws_server.serve(Arc::clone(&running)).await;
    running.store(false, Ordering::Relaxed);

    if let Err(e) = feed_task.await {
        warn!("change feed task ended abnormally: {e}");
    }
    http_task.await.context("HTTP server task panicked")??;
    served?;

    info!("redis-monitor stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn build(args: &[&str]) -> Result<MonitorConfig, ConfigError> {
        let mut argv = vec!["redis-monitor"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).into_monitor_config(&FileConfig::default())
    }

    #[test]
    fn test_cli_without_flags_leaves_everything_unset() {
        let cli = Cli::parse_from(["redis-monitor"]);

        assert!(cli.config.is_none());
        assert!(cli.ws_port.is_none());
        assert!(!cli.realtime);
    }

    #[test]
    fn test_no_flags_produce_defaults() {
        // Act
        let config = build(&[]).unwrap();

        // Assert
        assert_eq!(config.http_bind_addr.port(), 8000);
        assert_eq!(config.ws_bind_addr.port(), 8001);
        assert_eq!(config.redis.url(), "redis://localhost:6379/0");
        assert_eq!(config.refresh_interval, Duration::from_millis(500));
        assert_eq!(config.mode, FeedMode::Poll);
    }

    #[test]
    fn test_ports_and_redis_overrides() {
        let config = build(&[
            "--http-port",
            "9000",
            "--ws-port",
            "9001",
            "--redis-host",
            "10.0.0.5",
            "--redis-port",
            "6380",
            "--redis-db",
            "3",
        ])
        .unwrap();

        assert_eq!(config.http_bind_addr.port(), 9000);
        assert_eq!(config.ws_bind_addr.port(), 9001);
        assert_eq!(config.redis.url(), "redis://10.0.0.5:6380/3");
    }

    #[test]
    fn test_realtime_and_refresh_rate() {
        let config = build(&["--realtime", "--refresh-rate", "0.1"]).unwrap();

        assert_eq!(config.mode, FeedMode::Subscribe);
        assert_eq!(config.refresh_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_refresh_rate_returns_error() {
        assert!(build(&["--refresh-rate", "0"]).is_err());
    }

    #[test]
    fn test_zero_idle_timeout_disables_it() {
        let config = build(&["--idle-timeout", "0"]).unwrap();
        assert_eq!(config.idle_timeout, None);

        let config = build(&["--idle-timeout", "15"]).unwrap();
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_invalid_bind_returns_error() {
        let result = build(&["--ws-bind", "not.an.ip"]);

        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_flags_take_precedence_over_file() {
        // Arrange: file sets both ports, CLI overrides only the push channel
        let file: FileConfig = toml::from_str(
            r#"
            realtime = true
            [http]
            port = 7000
            [ws]
            port = 7001
            "#,
        )
        .unwrap();
        let cli = Cli::parse_from(["redis-monitor", "--ws-port", "9001"]);

        // Act
        let config = cli.into_monitor_config(&file).unwrap();

        // Assert
        assert_eq!(config.http_bind_addr.port(), 7000);
        assert_eq!(config.ws_bind_addr.port(), 9001);
        assert_eq!(config.mode, FeedMode::Subscribe);
    }

    #[test]
    fn test_outbound_queue_is_at_least_one() {
        let config = build(&["--outbound-queue", "0"]).unwrap();
        assert_eq!(config.outbound_queue, 1);
    }
}
