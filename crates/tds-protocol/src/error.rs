//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while interpreting raw protocol bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes were available for the structure being decoded.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The packet type byte is not a known TDS packet type.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// The packet status byte carries unknown bits.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// The SMP envelope did not start with the SMP identifier.
    #[error("invalid SMP identifier: 0x{0:02X}")]
    InvalidSmpId(u8),

    /// The SMP envelope flags byte carries unknown bits.
    #[error("invalid SMP flags: 0x{0:02X}")]
    InvalidSmpFlags(u8),

    /// A length field is smaller than the header that contains it.
    #[error("invalid length {length}, minimum is {minimum}")]
    InvalidLength {
        /// Length found on the wire.
        length: usize,
        /// Smallest acceptable length.
        minimum: usize,
    },
}
