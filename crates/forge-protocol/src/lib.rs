//! forge-protocol
//!
//! Wire-level encoding/decoding for the forge server.
//!
//! This crate turns logical `forge-core` messages into length-prefixed
//! JSON frames and back again.
//!
//! - [`wire`]    : protocol version and frame limits
//! - [`codec`]   : one-message-per-buffer encode/decode
//! - [`framing`] : async length-prefixed frame I/O

pub mod codec;
pub mod framing;
pub mod wire;

pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    ClientMessage, ProtocolError,
};
pub use framing::{read_frame, write_frame, FrameError};
pub use wire::{MAX_FRAME_LEN, PROTOCOL_VERSION};
