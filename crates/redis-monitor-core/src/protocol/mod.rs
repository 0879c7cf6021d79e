//! Protocol module containing the frame codec and the upgrade handshake.

pub mod frame;
pub mod handshake;

pub use frame::{
    apply_mask, decode_frame, encode_bytes, encode_frame, encode_json, encode_text, Decoded,
    Frame, FrameError, Opcode,
};
pub use handshake::{accept_token, extract_client_key, handshake_response, HandshakeError};
