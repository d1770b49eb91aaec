//! Message reassembly.
//!
//! A TDS message spans one or more packets; the last one carries
//! `END_OF_MESSAGE`. The assembler strips each packet's header and
//! concatenates payloads until the message is complete.

use bytes::{Bytes, BytesMut};
use tds_protocol::{PACKET_HEADER_SIZE, PacketHeader, PacketType};

use crate::error::CodecError;
use crate::packet::Packet;

/// A complete TDS message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Packet type of the first packet.
    pub packet_type: PacketType,
    /// Session the packets were addressed to.
    pub sid: u16,
    /// Concatenated payloads.
    pub payload: Bytes,
}

impl Message {
    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates packets until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet holding TDS bytes (header included).
    ///
    /// Returns the message once its final packet has been pushed.
    pub fn push(&mut self, packet: &Packet) -> Result<Option<Message>, CodecError> {
        let data = packet.data();
        let header = PacketHeader::decode(&mut &data[..])?;
        let packet_type = *self.packet_type.get_or_insert(header.packet_type);

        self.buffer.extend_from_slice(&data[PACKET_HEADER_SIZE..]);
        self.packet_count += 1;

        tracing::trace!(
            sid = packet.sid(),
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = header.is_end_of_message(),
            "assembling message"
        );

        if !header.is_end_of_message() {
            return Ok(None);
        }
        self.packet_type = None;
        self.packet_count = 0;
        Ok(Some(Message {
            packet_type,
            sid: packet.sid(),
            payload: self.buffer.split().freeze(),
        }))
    }

    /// Whether a partial message is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Drop any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::PacketStatus;

    fn make_packet(is_eom: bool, payload: &[u8]) -> Packet {
        let status = if is_eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let header = PacketHeader::new(
            PacketType::TabularResult,
            status,
            (PACKET_HEADER_SIZE + payload.len()) as u16,
        );
        let mut packet = Packet::allocate(64, Some(&header.to_bytes()[..])).unwrap();
        packet.extend(payload).unwrap();
        packet
    }

    #[test]
    fn test_single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(&make_packet(true, b"hello")).unwrap().unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_multi_packet_message() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(&make_packet(false, b"hello ")).unwrap().is_none());
        assert!(assembler.push(&make_packet(false, b"world")).unwrap().is_none());
        assert_eq!(assembler.packet_count(), 2);

        let message = assembler.push(&make_packet(true, b"!")).unwrap().unwrap();
        assert_eq!(&message.payload[..], b"hello world!");
        assert_eq!(assembler.packet_count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut assembler = MessageAssembler::new();
        assembler.push(&make_packet(false, b"partial")).unwrap();
        assert!(assembler.has_partial());
        assembler.clear();
        assert!(!assembler.has_partial());
    }

    #[test]
    fn test_rejects_headerless_packet() {
        let mut assembler = MessageAssembler::new();
        let packet = Packet::allocate(8, Some(&b"abc"[..])).unwrap();
        assert!(assembler.push(&packet).is_err());
    }
}
