//! Frame codec for the push channel.
//!
//! Wire format (the unfragmented subset of RFC 6455 used by redis-monitor):
//! ```text
//! [FIN|RSV|opcode:1][MASK|len7:1][ext_len:0|2|8][mask:0|4][payload:N]
//! ```
//! `len7` is the payload length when it is below 126.  The marker 126 means
//! a 2-byte big-endian length follows; 127 means an 8-byte one follows.  The
//! encoder always picks the smallest class that fits.
//!
//! # Supported subset
//!
//! The server only ever *sends* single text frames (FIN set, unmasked).  On
//! the receive side it decodes one frame at a time and unmasks the payload.
//! Fragmentation, extensions and ping/pong keep-alive are not implemented:
//! such frames decode structurally, but their payloads are not reassembled
//! or answered.

use serde::Serialize;
use thiserror::Error;

/// FIN flag in the first header byte.
pub const FIN_BIT: u8 = 0b1000_0000;

/// MASK flag in the second header byte.
pub const MASK_BIT: u8 = 0b1000_0000;

/// Length marker announcing a 2-byte extended payload length.
pub const LEN_16_MARKER: u8 = 126;

/// Length marker announcing an 8-byte extended payload length.
pub const LEN_64_MARKER: u8 = 127;

/// Decoded payload treated as a close request: status code 1001 ("going
/// away") in big-endian order, which is what browsers send when a tab is
/// closed or navigated away.
pub const GOING_AWAY_PAYLOAD: [u8; 2] = 1001u16.to_be_bytes();

/// Errors that can occur while decoding or encoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The byte slice is shorter than the frame it announces.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The 8-byte length field does not fit the platform or has its most
    /// significant bit set (forbidden by the protocol).
    #[error("payload length {0} is out of range")]
    LengthOverflow(u64),

    /// A structured value could not be serialized to JSON.
    #[error("failed to serialize message: {0}")]
    Serialize(String),
}

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any reserved opcode value.
    Reserved(u8),
}

impl Opcode {
    /// Maps the low nibble of a header byte to an opcode.
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    /// Returns the 4-bit wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(v) => v & 0x0F,
        }
    }
}

/// One protocol frame.
///
/// The payload length is not stored separately; it is always
/// `payload.len()`, and the encoder derives the length class from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Present on client-to-server frames.  `payload` holds the *unmasked*
    /// bytes; masking is applied on encode and removed on decode.
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked text frame; the only kind the server sends.
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Returns the same frame with a client mask applied on encode.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Number of header bytes this frame occupies on the wire.
    pub fn header_len(&self) -> usize {
        let ext = match self.payload.len() {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask = if self.mask.is_some() { 4 } else { 0 };
        2 + ext + mask
    }
}

/// Result of decoding the front of a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of bytes it occupied.
    Frame { frame: Frame, consumed: usize },
    /// The peer is done: the stream ended, a close frame arrived, or the
    /// payload was the bare 1001 "going away" status.
    Terminate,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a frame into wire bytes.
///
/// # Examples
///
/// ```rust
/// use redis_monitor_core::protocol::frame::{encode_frame, Frame};
///
/// let bytes = encode_frame(&Frame::text("hi"));
/// assert_eq!(bytes, vec![0x81, 0x02, b'h', b'i']);
/// ```
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let len = frame.payload.len();
    let mut buf = Vec::with_capacity(frame.header_len() + len);

    let fin = if frame.fin { FIN_BIT } else { 0 };
    buf.push(fin | frame.opcode.as_u8());

    let mask_flag = if frame.mask.is_some() { MASK_BIT } else { 0 };
    if len < LEN_16_MARKER as usize {
        buf.push(mask_flag | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_flag | LEN_16_MARKER);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_flag | LEN_64_MARKER);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match frame.mask {
        Some(mask) => {
            buf.extend_from_slice(&mask);
            let start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[start..], mask);
        }
        None => buf.extend_from_slice(&frame.payload),
    }
    buf
}

/// Encodes a UTF-8 string as one server text frame.
pub fn encode_text(text: &str) -> Vec<u8> {
    encode_bytes(text.as_bytes())
}

/// Encodes raw bytes as one server text frame, untouched.
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    encode_frame(&Frame::text(bytes))
}

/// Serializes a structured value to JSON and encodes it as one text frame.
///
/// # Errors
///
/// Returns [`FrameError::Serialize`] if `serde_json` rejects the value
/// (for example a map with non-string keys).
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(value).map_err(|e| FrameError::Serialize(e.to_string()))?;
    Ok(encode_bytes(&json))
}

/// Decodes one frame from the beginning of `bytes`.
///
/// An empty slice means the peer closed the stream and yields
/// [`Decoded::Terminate`].  Otherwise the caller gets the frame and the
/// number of bytes consumed, so it can advance its read cursor.
///
/// # Errors
///
/// Returns [`FrameError::InsufficientData`] when `bytes` holds only part of
/// a frame (the caller should read more), and
/// [`FrameError::LengthOverflow`] for an impossible 8-byte length.
pub fn decode_frame(bytes: &[u8]) -> Result<Decoded, FrameError> {
    if bytes.is_empty() {
        return Ok(Decoded::Terminate);
    }
    require(bytes, 2)?;

    let fin = bytes[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(bytes[0]);
    let masked = bytes[1] & MASK_BIT != 0;
    let len7 = bytes[1] & !MASK_BIT;

    let (payload_len, mut offset) = match len7 {
        LEN_16_MARKER => {
            require(bytes, 4)?;
            (u16::from_be_bytes([bytes[2], bytes[3]]) as u64, 4)
        }
        LEN_64_MARKER => {
            require(bytes, 10)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (n as u64, 2),
    };
    if payload_len >> 63 != 0 {
        return Err(FrameError::LengthOverflow(payload_len));
    }
    let payload_len =
        usize::try_from(payload_len).map_err(|_| FrameError::LengthOverflow(payload_len))?;

    let mask = if masked {
        require(bytes, offset + 4)?;
        let mut mask = [0u8; 4];
        mask.copy_from_slice(&bytes[offset..offset + 4]);
        offset += 4;
        Some(mask)
    } else {
        None
    };

    let total = offset
        .checked_add(payload_len)
        .ok_or(FrameError::LengthOverflow(payload_len as u64))?;
    require(bytes, total)?;

    let mut payload = bytes[offset..total].to_vec();
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    if opcode == Opcode::Close || payload == GOING_AWAY_PAYLOAD {
        return Ok(Decoded::Terminate);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            opcode,
            mask,
            payload,
        },
        consumed: total,
    })
}

/// XORs every byte with `mask[i % 4]`.  Applying it twice is the identity.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn require(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        Err(FrameError::InsufficientData {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
