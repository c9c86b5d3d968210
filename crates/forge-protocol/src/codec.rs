//! Encoding/decoding of protocol messages.
//!
//! This module converts between raw frame bodies (`&[u8]`) and the logical
//! message types of `forge-core`. A body is a JSON object wrapping the
//! message together with the protocol version:
//!
//! ```text
//! {"v": 1, "body": { ...message... }}
//! ```
//!
//! One message per buffer. Stream framing (the length prefix) is the
//! transport's job, via [`crate::framing`].
//!
//! All payload types are plain values; there are no object references on
//! the wire and therefore nothing cyclic to break.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forge_core::{Request, ServerMessage};

use crate::wire::{MAX_FRAME_LEN, PROTOCOL_VERSION};

/// Errors that can arise when encoding/decoding a frame body.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded or received body larger than [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized(usize),

    /// Unsupported or mismatched protocol version.
    #[error("protocol version mismatch: got {0}, expected {PROTOCOL_VERSION}")]
    VersionMismatch(u8),

    /// The body is not valid JSON for the expected message shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Client → server wire message: a request tagged with the client-assigned
/// serial that replies will echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub serial: u64,
    pub request: Request,
}

#[derive(Serialize, Deserialize)]
struct Frame<T> {
    v: u8,
    body: T,
}

// ============================================================================
// INPUT: client → server
// ============================================================================

/// Encode a single client message; the bytes are appended to `out`.
pub fn encode_client_message(
    message: &ClientMessage,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    encode(message, out)
}

/// Decode a single client message from a frame body.
pub fn decode_client_message(buf: &[u8]) -> Result<ClientMessage, ProtocolError> {
    decode(buf)
}

// ============================================================================
// OUTPUT: server → client
// ============================================================================

/// Encode a single server message; the bytes are appended to `out`.
pub fn encode_server_message(
    message: &ServerMessage,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    encode(message, out)
}

/// Decode a single server message from a frame body. This is the
/// **client**-side half when reading from the server.
pub fn decode_server_message(buf: &[u8]) -> Result<ServerMessage, ProtocolError> {
    decode(buf)
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn encode<T: Serialize>(body: &T, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let bytes = serde_json::to_vec(&Frame {
        v: PROTOCOL_VERSION,
        body,
    })?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(bytes.len()));
    }
    out.extend_from_slice(&bytes);
    Ok(())
}

fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, ProtocolError> {
    if buf.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(buf.len()));
    }
    let frame: Frame<T> = serde_json::from_slice(buf)?;
    if frame.v != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(frame.v));
    }
    Ok(frame.body)
}
