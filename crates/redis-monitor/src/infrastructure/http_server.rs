//! HTTP server for the browser UI.
//!
//! - `GET /<path>` serves files from the web root.  An empty path, or any
//!   path with a `..` segment, serves `index.html`; a missing file is a 404.
//!   The UI script `js/redis-web-gui.js` is a template whose `%(ws_port)s`
//!   placeholder is replaced with the push-channel port.
//! - `POST` to any path takes a form-urlencoded body whose field names are
//!   keys and whose values are JSON, and writes each one to the store.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use redis_monitor_core::domain::value::to_store_string;
use redis_monitor_core::ValueParseError;

use crate::application::store::{KeyValueStore, StoreError};
use crate::domain::config::SHUTDOWN_POLL_INTERVAL;

/// Placeholder in the UI script replaced by the push-channel port.
pub const WS_PORT_PLACEHOLDER: &str = "%(ws_port)s";

/// Web-root-relative path of the templated UI script.
pub const TEMPLATED_ASSET: &str = "js/redis-web-gui.js";

const INDEX_FILE: &str = "index.html";
const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Error type for HTTP requests.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("value for {key:?} is not valid JSON: {source}")]
    InvalidJson {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value for {key:?} cannot be stored: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: ValueParseError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServeError::NotFound(_) => StatusCode::NOT_FOUND,
            ServeError::InvalidJson { .. } | ServeError::InvalidValue { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServeError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServeError::Store(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!("{self}");
        }
        (status, self.to_string()).into_response()
    }
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub web_root: Arc<PathBuf>,
    pub ws_port: u16,
    pub store: Arc<dyn KeyValueStore>,
}

/// Builds the router for the UI and write-back endpoints.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(serve_asset).post(write_back))
        .route("/*path", get(serve_asset).post(write_back))
        .with_state(state)
}

/// Serves HTTP on `addr` until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_http(
    addr: SocketAddr,
    state: HttpState,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while running.load(Ordering::Relaxed) {
                tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
        })
        .await
        .context("HTTP server failed")
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn serve_asset(State(state): State<HttpState>, uri: Uri) -> Result<Response, ServeError> {
    let relative = resolve_request_path(uri.path());
    let path = state.web_root.join(&relative);

    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ServeError::NotFound(relative.display().to_string()));
    }

    let io_error = |source| ServeError::Io {
        path: path.clone(),
        source,
    };
    let body = if relative == Path::new(TEMPLATED_ASSET) {
        let template = tokio::fs::read_to_string(&path).await.map_err(io_error)?;
        render_ws_port(&template, state.ws_port).into_bytes()
    } else {
        tokio::fs::read(&path).await.map_err(io_error)?
    };

    Ok(([(header::CONTENT_TYPE, content_type(&relative))], body).into_response())
}

async fn write_back(
    State(state): State<HttpState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<StatusCode, ServeError> {
    // Validate every field before writing any of them.
    let mut writes = Vec::with_capacity(fields.len());
    for (key, raw) in fields {
        let json: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| ServeError::InvalidJson {
                key: key.clone(),
                source,
            })?;
        let value = to_store_string(&json).map_err(|source| ServeError::InvalidValue {
            key: key.clone(),
            source,
        })?;
        writes.push((key, value));
    }

    for (key, value) in writes {
        info!(key = %key, value = %value, "browser write");
        state.store.set(&key, &value).await?;
    }
    Ok(StatusCode::OK)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Maps a request path to a path relative to the web root.
///
/// Empty segments are ignored.  An empty path, or one containing a `..`
/// segment, maps to `index.html`.
pub fn resolve_request_path(request_path: &str) -> PathBuf {
    let segments: Vec<&str> = request_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.contains(&"..") {
        return PathBuf::from(INDEX_FILE);
    }
    segments.iter().collect()
}

/// Fills the UI script template: `%(ws_port)s` becomes the port and `%%`
/// becomes a single `%`.  Any other `%` is kept as is.
pub fn render_ws_port(template: &str, ws_port: u16) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%%") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix(WS_PORT_PLACEHOLDER) {
            out.push_str(&ws_port.to_string());
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// MIME type from the file extension, `text/html` when unknown.
pub fn content_type(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
