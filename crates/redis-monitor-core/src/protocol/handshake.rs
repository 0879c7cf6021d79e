//! HTTP upgrade handshake that promotes a TCP connection to the push channel.
//!
//! The client sends an HTTP request carrying a `Sec-WebSocket-Key` nonce.
//! The server proves it understood the upgrade by hashing that nonce with a
//! fixed GUID and echoing the result back in a `101` response:
//!
//! ```text
//! token = base64( SHA-1( nonce + "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" ) )
//! ```
//!
//! Everything here operates on bytes already read from the socket, so the
//! I/O side (timeouts, buffering) stays in the server crate.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client nonce before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header that carries the client nonce (matched case-insensitively).
pub const KEY_HEADER: &str = "sec-websocket-key";

/// Blank line that ends the HTTP request head.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors raised while parsing the client's upgrade request.
#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    /// The request head ended without a `Sec-WebSocket-Key` header, or the
    /// header value was empty.
    #[error("upgrade request has no Sec-WebSocket-Key header")]
    MissingKey,

    /// The request head is not valid UTF-8.
    #[error("upgrade request is not valid UTF-8")]
    InvalidUtf8,

    /// The peer stopped sending before the request head was complete.
    #[error("upgrade request ended after {0} bytes without a blank line")]
    Incomplete(usize),
}

/// Computes the `Sec-WebSocket-Accept` token for a client nonce.
///
/// # Examples
///
/// ```rust
/// use redis_monitor_core::protocol::handshake::accept_token;
///
/// assert_eq!(
///     accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_token(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Returns the length of the request head (including the blank line) once
/// `buf` contains a complete one.
pub fn request_head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Scans the request line by line for the key header and returns its
/// trimmed value.
///
/// Only the key header is inspected; `Upgrade`, `Connection` and the
/// protocol version are accepted as sent.
///
/// # Errors
///
/// Returns [`HandshakeError::InvalidUtf8`] for non-UTF-8 input and
/// [`HandshakeError::MissingKey`] when no non-empty key header is present.
pub fn extract_client_key(request: &[u8]) -> Result<String, HandshakeError> {
    let text = std::str::from_utf8(request).map_err(|_| HandshakeError::InvalidUtf8)?;
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case(KEY_HEADER) {
            let value = value.trim();
            if value.is_empty() {
                return Err(HandshakeError::MissingKey);
            }
            return Ok(value.to_string());
        }
    }
    Err(HandshakeError::MissingKey)
}

/// Builds the fixed-format `101` response embedding `token`.
pub fn handshake_response(token: &str) -> String {
    format!(
        "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {token}\r\n\r\n"
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
