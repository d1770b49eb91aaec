//! MARS session multiplexing (SMP) envelope.
//!
//! When several logical sessions share one transport, every TDS packet is
//! wrapped in a 16-byte SMP header carrying the session id, a sequence number
//! and the receive window. Control frames (`SYN`, `ACK`, `FIN`) carry no payload.
//! All multi-byte fields are little-endian.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// SMP header size in bytes.
pub const SMP_HEADER_SIZE: usize = 16;

/// First byte of every SMP header.
pub const SMP_ID: u8 = 0x53;

bitflags! {
    /// SMP frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SmpFlags: u8 {
        /// Open a session.
        const SYN = 0x01;
        /// Acknowledge received data and advance the window.
        const ACK = 0x02;
        /// Close a session.
        const FIN = 0x04;
        /// Frame carries a TDS packet.
        const DATA = 0x08;
    }
}

/// SMP envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpHeader {
    /// Frame kind.
    pub flags: SmpFlags,
    /// Logical session id.
    pub sid: u16,
    /// Total frame length including this header.
    pub length: u32,
    /// Sequence number of this DATA frame.
    pub seq: u32,
    /// Highest sequence number the sender is willing to receive.
    pub window: u32,
}

impl SmpHeader {
    /// Build a header for a frame carrying `payload_len` bytes.
    #[must_use]
    pub const fn new(flags: SmpFlags, sid: u16, payload_len: usize, seq: u32, window: u32) -> Self {
        Self {
            flags,
            sid,
            length: (SMP_HEADER_SIZE + payload_len) as u32,
            seq,
            window,
        }
    }

    /// Read the total frame length without consuming anything.
    #[must_use]
    pub fn peek_length(src: &[u8]) -> Option<usize> {
        if src.len() < SMP_HEADER_SIZE {
            return None;
        }
        Some(u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize)
    }

    /// Parse an SMP header.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < SMP_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: SMP_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let smid = src.get_u8();
        if smid != SMP_ID {
            return Err(ProtocolError::InvalidSmpId(smid));
        }
        let flag_byte = src.get_u8();
        let flags = SmpFlags::from_bits(flag_byte).ok_or(ProtocolError::InvalidSmpFlags(flag_byte))?;
        let sid = src.get_u16_le();
        let length = src.get_u32_le();
        if (length as usize) < SMP_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength {
                length: length as usize,
                minimum: SMP_HEADER_SIZE,
            });
        }

        Ok(Self {
            flags,
            sid,
            length,
            seq: src.get_u32_le(),
            window: src.get_u32_le(),
        })
    }

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(SMP_ID);
        dst.put_u8(self.flags.bits());
        dst.put_u16_le(self.sid);
        dst.put_u32_le(self.length);
        dst.put_u32_le(self.seq);
        dst.put_u32_le(self.window);
    }

    /// Encode into a fixed array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SMP_HEADER_SIZE] {
        let mut out = [0u8; SMP_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.encode(&mut dst);
        out
    }

    /// Payload length carried after the header.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(SMP_HEADER_SIZE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let header = SmpHeader::new(SmpFlags::DATA, 3, 100, 7, 11);
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], SMP_ID);
        assert_eq!(bytes[1], 0x08);
        assert_eq!(&bytes[2..4], &[3, 0]);
        assert_eq!(&bytes[4..8], &116u32.to_le_bytes());
        assert_eq!(SmpHeader::peek_length(&bytes), Some(116));

        let mut cursor = &bytes[..];
        let decoded = SmpHeader::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_length(), 100);
    }

    #[test]
    fn test_rejects_wrong_smid() {
        let mut bytes = SmpHeader::new(SmpFlags::SYN, 1, 0, 0, 4).to_bytes();
        bytes[0] = 0x12;
        let mut cursor = &bytes[..];
        assert_eq!(
            SmpHeader::decode(&mut cursor),
            Err(ProtocolError::InvalidSmpId(0x12))
        );
    }

    #[test]
    fn test_rejects_short_length() {
        let mut bytes = SmpHeader::new(SmpFlags::FIN, 1, 0, 0, 4).to_bytes();
        bytes[4..8].copy_from_slice(&4u32.to_le_bytes());
        let mut cursor = &bytes[..];
        assert!(matches!(
            SmpHeader::decode(&mut cursor),
            Err(ProtocolError::InvalidLength { length: 4, .. })
        ));
    }
}
