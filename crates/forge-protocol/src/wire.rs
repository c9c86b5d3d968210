//! Low-level wire constants.
//!
//! The actual encode/decode logic lives in [`crate::codec`]; the async
//! frame I/O lives in [`crate::framing`].

/// Current protocol version, carried in every frame.
///
/// Bumped if the framing or the message envelope changes incompatibly.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum frame body length on the wire.
///
/// Key lookups and completion lists are small; a megabyte of headroom
/// means any bigger frame is a corrupt length prefix or a misbehaving
/// peer, and is rejected before allocation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A tiny helper for validating frame lengths.
pub fn validate_frame_len(len: usize) -> bool {
    len > 0 && len <= MAX_FRAME_LEN
}
