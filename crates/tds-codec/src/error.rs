//! Codec error types.

use std::io;

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors from packet buffering and framing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Header bytes could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A frame declared a length shorter than its own header.
    #[error("invalid packet header")]
    InvalidHeader,

    /// A frame is larger than the configured maximum.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Buffer memory could not be reserved.
    #[error("failed to allocate {requested} bytes for packet buffer")]
    Allocation {
        /// Total capacity that was requested.
        requested: usize,
    },

    /// A write would run past the packet's capacity.
    #[error("packet overflow: {needed} bytes needed, {available} available")]
    Overflow {
        /// Bytes the caller tried to write.
        needed: usize,
        /// Bytes left before capacity.
        available: usize,
    },
}
