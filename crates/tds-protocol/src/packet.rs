//! TDS packet header definitions.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Maximum TDS packet size (64KB - 1).
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default negotiated block size.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest block size a session buffer may be resized to.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Extra bytes reserved past the block size in every send buffer.
///
/// Encoders may write a small trailer past the block boundary before the
/// packet is split, so the send buffer always carries this margin.
pub const ADDITIONAL_SPACE: usize = 16;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Language query.
    SqlBatch = 0x01,
    /// Login for TDS 5.0 and earlier.
    Login = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Server reply.
    TabularResult = 0x04,
    /// Attention (cancel) signal.
    Attention = 0x06,
    /// Bulk copy data.
    BulkLoad = 0x07,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// TDS 5.0 token stream request.
    Normal = 0x0F,
    /// TDS 7.0+ login.
    Tds7Login = 0x10,
    /// SSPI / NTLM authentication.
    Sspi = 0x11,
    /// Pre-login handshake.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => Self::SqlBatch,
            0x02 => Self::Login,
            0x03 => Self::Rpc,
            0x04 => Self::TabularResult,
            0x06 => Self::Attention,
            0x07 => Self::BulkLoad,
            0x0E => Self::TransactionManager,
            0x0F => Self::Normal,
            0x10 => Self::Tds7Login,
            0x11 => Self::Sspi,
            0x12 => Self::PreLogin,
            _ => return Err(ProtocolError::InvalidPacketType(value)),
        })
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event.
        const IGNORE_EVENT = 0x02;
        /// Reset the connection before processing.
        const RESET_CONNECTION = 0x08;
        /// Reset the connection but keep the transaction.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// The 8-byte header that starts every TDS packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header, big-endian on the wire.
    pub length: u16,
    /// Server process id.
    pub spid: u16,
    /// Packet sequence number, wraps at 255.
    pub packet_id: u8,
    /// Window, always 0.
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Read the total length field of a header without consuming it.
    ///
    /// Returns `None` when fewer than [`PACKET_HEADER_SIZE`] bytes are available.
    #[must_use]
    pub fn peek_length(src: &[u8]) -> Option<usize> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }
        Some(u16::from_be_bytes([src[2], src[3]]) as usize)
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidPacketStatus(status_byte))?;

        Ok(Self {
            packet_type,
            status,
            length: src.get_u16(),
            spid: src.get_u16(),
            packet_id: src.get_u8(),
            window: src.get_u8(),
        })
    }

    /// Encode the packet header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Encode into a fixed array, for writing over a reserved header region.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.encode(&mut dst);
        out
    }

    /// Payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Whether this is the last packet of a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet sequence number.
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::Normal,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            spid: 54,
            packet_id: 1,
            window: 0,
        };

        let bytes = header.to_bytes();
        let mut cursor = &bytes[..];
        assert_eq!(PacketHeader::decode(&mut cursor).unwrap(), header);
    }

    #[test]
    fn test_length_is_big_endian() {
        let header = PacketHeader::new(PacketType::BulkLoad, PacketStatus::NORMAL, 0x0102);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[2..4], &[0x01, 0x02]);
        assert_eq!(PacketHeader::peek_length(&bytes), Some(0x0102));
        assert_eq!(PacketHeader::peek_length(&bytes[..5]), None);
    }

    #[test]
    fn test_payload_length() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
        assert!(header.is_end_of_message());
    }

    #[test]
    fn test_short_header_rejected() {
        let mut cursor = &[0x01u8, 0x01, 0x00][..];
        assert_eq!(
            PacketHeader::decode(&mut cursor),
            Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: 3
            })
        );
    }

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0x0F).unwrap(), PacketType::Normal);
        assert_eq!(PacketType::from_u8(0x12).unwrap(), PacketType::PreLogin);
        assert!(PacketType::from_u8(0xFF).is_err());
    }
}
