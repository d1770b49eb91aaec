//! TDS packet framing for tokio-util codecs.
//!
//! In plain mode each frame is one TDS packet, sized by the big-endian
//! length in its header. In MARS mode every frame starts with a 16-byte SMP
//! envelope whose little-endian length covers the envelope and the TDS
//! packet it carries. Control frames decode to empty packets with the
//! envelope attached.

use bytes::{BufMut, BytesMut};
use tds_protocol::{
    MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, SMP_HEADER_SIZE, SmpFlags, SmpHeader,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::packet::Packet;

/// TDS packet codec.
#[derive(Debug)]
pub struct TdsCodec {
    max_packet_size: usize,
    packet_id: u8,
    mars: bool,
}

impl TdsCodec {
    /// Plain (non-multiplexed) codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            packet_id: 1,
            mars: false,
        }
    }

    /// Codec expecting SMP envelopes around every packet.
    #[must_use]
    pub fn mars() -> Self {
        Self {
            mars: true,
            ..Self::new()
        }
    }

    /// Limit accepted TDS packets to `size` bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
        self
    }

    /// Whether the codec frames SMP envelopes.
    #[must_use]
    pub fn is_mars(&self) -> bool {
        self.mars
    }

    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        if self.packet_id == 0 {
            self.packet_id = 1;
        }
        id
    }

    /// Restart packet numbering for a new message.
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
    }

    fn check_tds_length(&self, length: usize) -> Result<(), CodecError> {
        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }
        Ok(())
    }

    fn decode_plain(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(length) = PacketHeader::peek_length(src) else {
            return Ok(None);
        };
        self.check_tds_length(length)?;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let header = PacketHeader::decode(&mut &frame[..])?;
        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );
        Packet::allocate(length, Some(&frame[..])).map(Some)
    }

    fn decode_mars(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(length) = SmpHeader::peek_length(src) else {
            return Ok(None);
        };
        if length < SMP_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
        }
        if length > self.max_packet_size + SMP_HEADER_SIZE {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size + SMP_HEADER_SIZE,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let envelope = SmpHeader::decode(&mut &frame[..])?;
        let payload = &frame[SMP_HEADER_SIZE..];
        if envelope.flags.contains(SmpFlags::DATA) {
            let tds_len = PacketHeader::peek_length(payload).ok_or(CodecError::InvalidHeader)?;
            self.check_tds_length(tds_len)?;
            if tds_len != payload.len() {
                return Err(CodecError::InvalidHeader);
            }
        }

        tracing::trace!(
            sid = envelope.sid,
            flags = ?envelope.flags,
            seq = envelope.seq,
            length,
            "decoded SMP frame"
        );
        let mut packet = Packet::allocate(payload.len(), Some(payload))?;
        packet.set_sid(envelope.sid);
        packet.set_envelope(Some(envelope));
        Ok(Some(packet))
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.mars {
            self.decode_mars(src)
        } else {
            self.decode_plain(src)
        }
    }
}

impl Encoder<&Packet> for TdsCodec {
    type Error = CodecError;

    /// Write the packet's TDS bytes, stamping the header's length and
    /// sequence number. A packet carrying an envelope is prefixed with it.
    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item.data();
        if !data.is_empty() {
            self.check_tds_length(data.len())?;
        }

        let envelope_len = if item.envelope().is_some() {
            SMP_HEADER_SIZE
        } else {
            0
        };
        dst.reserve(envelope_len + data.len());

        if let Some(envelope) = item.envelope() {
            let mut envelope = *envelope;
            envelope.length = (SMP_HEADER_SIZE + data.len()) as u32;
            envelope.encode(dst);
        }

        let start = dst.len();
        dst.put_slice(data);
        if !data.is_empty() {
            let length = (data.len() as u16).to_be_bytes();
            dst[start + 2] = length[0];
            dst[start + 3] = length[1];
            dst[start + 6] = self.next_packet_id();
        }

        tracing::trace!(
            sid = item.sid(),
            length = data.len(),
            enveloped = envelope_len > 0,
            "encoded TDS packet"
        );
        Ok(())
    }
}
