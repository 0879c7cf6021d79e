//! Push-channel server: accept loop, upgrade handshake and per-connection
//! tasks.
//!
//! Each accepted socket is handled by its own Tokio task:
//!
//! 1. Read the HTTP upgrade request (bounded by the handshake timeout and
//!    [`MAX_HANDSHAKE_BYTES`]) and answer with the `101` response.
//! 2. Ask the [`ConnectionHandler`] for an initial frame and queue it.
//! 3. Spawn the writer task, which owns the socket's write half and drains
//!    the connection's outbound queue with a timeout on every write.
//! 4. Register the connection, then run the receive loop until the peer
//!    closes, errs, or the writer exits.
//! 5. Deregister.  This step runs on every exit path after registration.
//!
//! A failed handshake closes the socket without registering it.  Errors in
//! one connection are logged and never reach the accept loop or other
//! connections.
//!
//! # Limitations
//!
//! Only single, unfragmented frames are understood.  Ping, pong, binary and
//! continuation frames are decoded and handed to the handler as-is; nothing
//! is reassembled and pings are not answered.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use redis_monitor_core::protocol::handshake::{handshake_response, request_head_len};
use redis_monitor_core::protocol::{accept_token, extract_client_key};
use redis_monitor_core::{decode_frame, Decoded, FrameError, HandshakeError};

use crate::application::monitor::{ConnectionHandler, ConnectionId};
use crate::domain::config::{MonitorConfig, SHUTDOWN_POLL_INTERVAL};
use crate::infrastructure::connection::{CloseReason, Connection};
use crate::infrastructure::registry::{ConnectionHandle, ConnectionRegistry};

/// Largest upgrade request accepted before the connection is dropped.
pub const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

/// Largest inbound frame (header included) a client may send.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub outbound_queue: usize,
    pub write_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub handshake_timeout: Duration,
}

impl From<&MonitorConfig> for ServerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            outbound_queue: config.outbound_queue,
            write_timeout: config.write_timeout,
            idle_timeout: config.idle_timeout,
            handshake_timeout: config.handshake_timeout,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// A bound push-channel listener, ready to serve.
pub struct ProtocolServer {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
    settings: Arc<ServerSettings>,
}

impl ProtocolServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (port in use, no
    /// permission).
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ConnectionHandler>,
        settings: ServerSettings,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind push-channel listener on {addr}"))?;
        Ok(Self {
            listener,
            registry,
            handler,
            settings: Arc::new(settings),
        })
    }

    /// The address actually bound (useful after binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `running` is cleared.
    ///
    /// Connections that are already open keep running after this returns;
    /// they end with the runtime.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!("push channel listening on {}", self.local_addr()?);

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping push-channel accept loop");
                break;
            }

            // Bounded accept so the flag is re-checked while idle.
            match timeout(SHUTDOWN_POLL_INTERVAL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!(%peer, "accepted push-channel socket");
                    let registry = Arc::clone(&self.registry);
                    let handler = Arc::clone(&self.handler);
                    let settings = Arc::clone(&self.settings);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, registry, handler, settings).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }
        Ok(())
    }
}

// ── Per-connection task ───────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
    settings: Arc<ServerSettings>,
) {
    let mut conn = Connection::new(peer);
    let id = conn.id();
    match run_connection(&mut conn, stream, &registry, handler.as_ref(), &settings).await {
        Ok(reason) => info!(conn = %id, %peer, "connection closed: {reason}"),
        Err(e) => warn!(conn = %id, %peer, "connection aborted: {e:#}"),
    }
    conn.close();
}

async fn run_connection(
    conn: &mut Connection,
    stream: TcpStream,
    registry: &ConnectionRegistry,
    handler: &dyn ConnectionHandler,
    settings: &ServerSettings,
) -> anyhow::Result<CloseReason> {
    let id = conn.id();
    let peer = conn.peer();
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();

    // ── Handshake ────────────────────────────────────────────────────────────
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let head_len = timeout(
        settings.handshake_timeout,
        read_request_head(&mut reader, &mut buf),
    )
    .await
    .map_err(|_| anyhow!("handshake timed out after {:?}", settings.handshake_timeout))??;

    let key = extract_client_key(&buf[..head_len]).context("handshake rejected")?;
    // Anything after the request head is already frame data.
    buf.drain(..head_len);

    let response = handshake_response(&accept_token(&key));
    timeout(settings.write_timeout, writer.write_all(response.as_bytes()))
        .await
        .map_err(|_| anyhow!("handshake response timed out"))?
        .context("failed to write handshake response")?;
    conn.open()?;
    info!(conn = %id, %peer, "push channel open");

    // ── Initial frame, writer, registration ──────────────────────────────────
    let (tx, rx) = mpsc::channel(settings.outbound_queue.max(1));
    if let Some(frame) = handler.on_connect(id, peer).await {
        tx.try_send(Arc::from(frame))
            .map_err(|_| anyhow!("failed to queue initial frame"))?;
    }
    let mut writer_task = tokio::spawn(write_loop(writer, rx, settings.write_timeout));
    registry.insert(ConnectionHandle::new(id, peer, tx)).await;

    // ── Receive loop ─────────────────────────────────────────────────────────
    let reason = receive_loop(
        &mut reader,
        buf,
        id,
        handler,
        settings.idle_timeout,
        &mut writer_task,
    )
    .await;

    registry.remove(id).await;
    writer_task.abort();
    handler.on_disconnect(id).await;
    Ok(reason)
}

/// Reads until `buf` holds a complete request head and returns its length.
async fn read_request_head(
    reader: &mut OwnedReadHalf,
    buf: &mut Vec<u8>,
) -> anyhow::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(len) = request_head_len(buf) {
            return Ok(len);
        }
        if buf.len() > MAX_HANDSHAKE_BYTES {
            bail!("upgrade request exceeds {MAX_HANDSHAKE_BYTES} bytes");
        }
        let n = reader
            .read(&mut chunk)
            .await
            .context("failed to read upgrade request")?;
        if n == 0 {
            return Err(HandshakeError::Incomplete(buf.len()).into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Decodes inbound frames and hands them to the handler until the
/// connection ends.  Also returns when the writer task exits.
async fn receive_loop(
    reader: &mut OwnedReadHalf,
    mut buf: Vec<u8>,
    id: ConnectionId,
    handler: &dyn ConnectionHandler,
    idle_timeout: Option<Duration>,
    writer_task: &mut JoinHandle<CloseReason>,
) -> CloseReason {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        while !buf.is_empty() {
            match decode_frame(&buf) {
                Ok(Decoded::Frame { frame, consumed }) => {
                    buf.drain(..consumed);
                    handler.on_message(id, frame).await;
                }
                Ok(Decoded::Terminate) => return CloseReason::CloseRequested,
                Err(FrameError::InsufficientData { needed, .. }) => {
                    if needed > MAX_INBOUND_FRAME {
                        return CloseReason::ProtocolError(format!(
                            "frame of {needed} bytes exceeds the {MAX_INBOUND_FRAME} byte limit"
                        ));
                    }
                    break;
                }
                Err(e) => return CloseReason::ProtocolError(e.to_string()),
            }
        }

        tokio::select! {
            read = read_some(reader, &mut chunk, idle_timeout) => match read {
                Ok(0) => return CloseReason::PeerClosed,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(reason) => return reason,
            },
            joined = &mut *writer_task => {
                return joined.unwrap_or_else(|e| CloseReason::WriteFailed(e.to_string()));
            }
        }
    }
}

async fn read_some(
    reader: &mut OwnedReadHalf,
    chunk: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, CloseReason> {
    let read = reader.read(chunk);
    let result = match idle_timeout {
        Some(limit) => timeout(limit, read)
            .await
            .map_err(|_| CloseReason::IdleTimeout)?,
        None => read.await,
    };
    result.map_err(|e| CloseReason::ReadFailed(e.to_string()))
}

/// Writes queued frames to the socket until the queue closes or a write
/// fails.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Arc<[u8]>>,
    write_timeout: Duration,
) -> CloseReason {
    while let Some(frame) = outbound.recv().await {
        match timeout(write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return CloseReason::WriteFailed(e.to_string()),
            Err(_) => return CloseReason::WriteTimedOut,
        }
    }
    // The registry dropped this connection's queue.
    writer.shutdown().await.ok();
    CloseReason::Evicted
}

// ── Tests ─────────────────────────────────────────────────────────────────────
