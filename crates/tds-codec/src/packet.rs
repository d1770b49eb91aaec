//! Capacity-bounded packet buffers and packet chains.
//!
//! A [`Packet`] owns one network buffer. The buffer may start with a reserved
//! region (the MARS envelope is written there just before the packet goes out)
//! followed by the TDS bytes. Packets link into singly linked [`PacketChain`]s
//! for queued output and for packets waiting to be read.
//!
//! Memory is reserved with `try_reserve_exact`, so running out of memory is an
//! ordinary [`CodecError::Allocation`] and the packet that was being grown is
//! left as it was.

use tds_protocol::{SmpFlags, SmpHeader};

use crate::error::CodecError;

/// A network packet buffer.
///
/// Invariant: `reserved() + data_len() <= capacity()`.
pub struct Packet {
    buf: Vec<u8>,
    capacity: usize,
    data_start: usize,
    sid: u16,
    envelope: Option<SmpHeader>,
    next: Option<Box<Packet>>,
}

impl Packet {
    /// Allocate a packet with room for `capacity` bytes.
    ///
    /// When `initial` is given its bytes are copied in and become the used
    /// length. The capacity is raised to fit them if needed.
    pub fn allocate(capacity: usize, initial: Option<&[u8]>) -> Result<Self, CodecError> {
        let capacity = initial.map_or(capacity, |bytes| capacity.max(bytes.len()));
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| CodecError::Allocation {
                requested: capacity,
            })?;
        if let Some(bytes) = initial {
            buf.extend_from_slice(bytes);
        }
        Ok(Self {
            buf,
            capacity,
            data_start: 0,
            sid: 0,
            envelope: None,
            next: None,
        })
    }

    /// Allocate a packet whose first `reserved` bytes are kept for an envelope.
    pub fn with_reserved(capacity: usize, reserved: usize) -> Result<Self, CodecError> {
        let mut packet = Self::allocate(capacity.max(reserved), None)?;
        packet.buf.resize(reserved, 0);
        packet.data_start = reserved;
        Ok(packet)
    }

    /// Grow the packet to hold at least `new_capacity` bytes.
    ///
    /// Already written bytes and the chain link are preserved. Asking for a
    /// capacity the packet already has is a no-op.
    pub fn grow(&mut self, new_capacity: usize) -> Result<(), CodecError> {
        if self.capacity >= new_capacity {
            return Ok(());
        }
        self.buf
            .try_reserve_exact(new_capacity - self.buf.len())
            .map_err(|_| CodecError::Allocation {
                requested: new_capacity,
            })?;
        tracing::trace!(from = self.capacity, to = new_capacity, "grew packet buffer");
        self.capacity = new_capacity;
        Ok(())
    }

    /// Total capacity including the reserved region.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the reserved envelope region.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.data_start
    }

    /// Used length after the reserved region.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.buf.len() - self.data_start
    }

    /// Bytes that can still be written.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Written bytes after the reserved region.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.data_start..]
    }

    /// Mutable view of the written bytes after the reserved region.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.data_start..]
    }

    /// Append bytes, failing if they do not fit.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining() {
            return Err(CodecError::Overflow {
                needed: bytes.len(),
                available: self.remaining(),
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Append as many bytes as fit, returning how many were written.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.buf.extend_from_slice(&bytes[..n]);
        n
    }

    /// Shorten the used length to `len` bytes after the reserved region.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(self.data_start + len);
    }

    /// Drop all data, keeping the reserved region and capacity.
    pub fn clear(&mut self) {
        self.truncate(0);
        self.envelope = None;
    }

    /// Session id this packet belongs to.
    #[must_use]
    pub fn sid(&self) -> u16 {
        self.sid
    }

    /// Tag the packet with a session id.
    pub fn set_sid(&mut self, sid: u16) {
        self.sid = sid;
    }

    /// MARS envelope this packet arrived with or will be sent with.
    #[must_use]
    pub fn envelope(&self) -> Option<&SmpHeader> {
        self.envelope.as_ref()
    }

    /// Attach a MARS envelope.
    pub fn set_envelope(&mut self, envelope: Option<SmpHeader>) {
        self.envelope = envelope;
    }

    /// Whether this is a MARS control frame without TDS payload.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.envelope
            .is_some_and(|env| !env.flags.contains(SmpFlags::DATA))
    }

    /// Next packet in the chain.
    #[must_use]
    pub fn next(&self) -> Option<&Packet> {
        self.next.as_deref()
    }

    /// Detach and return the rest of the chain.
    pub fn take_next(&mut self) -> Option<Box<Packet>> {
        self.next.take()
    }

    /// Link `next` after this packet, returning the previous tail link.
    pub fn set_next(&mut self, next: Option<Box<Packet>>) -> Option<Box<Packet>> {
        std::mem::replace(&mut self.next, next)
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("sid", &self.sid)
            .field("data_len", &self.data_len())
            .field("capacity", &self.capacity)
            .field("reserved", &self.data_start)
            .finish_non_exhaustive()
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse.
        let mut next = self.next.take();
        while let Some(mut packet) = next {
            next = packet.next.take();
        }
    }
}

/// Free every packet reachable from `head`, returning how many were freed.
pub fn free_chain(head: Option<Box<Packet>>) -> usize {
    let mut freed = 0;
    let mut next = head;
    while let Some(mut packet) = next {
        next = packet.next.take();
        freed += 1;
    }
    freed
}

/// A FIFO of packets linked through their `next` field.
#[derive(Debug, Default)]
pub struct PacketChain {
    head: Option<Box<Packet>>,
    len: usize,
}

impl PacketChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of packets in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// First packet.
    #[must_use]
    pub fn front(&self) -> Option<&Packet> {
        self.head.as_deref()
    }

    /// Append a packet at the tail.
    pub fn push_back(&mut self, packet: Packet) {
        let mut slot = &mut self.head;
        while let Some(node) = slot {
            slot = &mut node.next;
        }
        *slot = Some(Box::new(packet));
        self.len += 1;
    }

    /// Remove the first packet.
    pub fn pop_front(&mut self) -> Option<Packet> {
        let mut head = self.head.take()?;
        self.head = head.next.take();
        self.len -= 1;
        Some(*head)
    }

    /// Remove the first packet addressed to `sid`.
    pub fn take_for_sid(&mut self, sid: u16) -> Option<Packet> {
        let position = self.iter().position(|p| p.sid == sid)?;
        let mut slot = &mut self.head;
        for _ in 0..position {
            slot = &mut slot.as_mut()?.next;
        }
        let mut node = slot.take()?;
        *slot = node.next.take();
        self.len -= 1;
        Some(*node)
    }

    /// Iterate over the packets in order.
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        std::iter::successors(self.head.as_deref(), |p| p.next())
    }

    /// Free all packets, returning how many were freed.
    pub fn clear(&mut self) -> usize {
        self.len = 0;
        free_chain(self.head.take())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocate_empty() {
        let packet = Packet::allocate(512, None).unwrap();
        assert_eq!(packet.capacity(), 512);
        assert_eq!(packet.data_len(), 0);
        assert_eq!(packet.sid(), 0);
        assert!(packet.next().is_none());
    }

    #[test]
    fn test_allocate_with_bytes() {
        let packet = Packet::allocate(4, Some(&b"abcdef"[..])).unwrap();
        assert_eq!(packet.data(), b"abcdef");
        assert_eq!(packet.capacity(), 6);
    }

    #[test]
    fn test_grow_is_noop_when_large_enough() {
        let mut packet = Packet::allocate(64, Some(&b"xyz"[..])).unwrap();
        packet.grow(32).unwrap();
        assert_eq!(packet.capacity(), 64);
        assert_eq!(packet.data(), b"xyz");
    }

    #[test]
    fn test_grow_keeps_chain_link() {
        let mut first = Packet::allocate(8, Some(&b"1"[..])).unwrap();
        first.set_next(Some(Box::new(Packet::allocate(8, Some(&b"2"[..])).unwrap())));
        first.grow(1024).unwrap();
        assert_eq!(first.next().unwrap().data(), b"2");
    }

    #[test]
    fn test_extend_respects_capacity() {
        let mut packet = Packet::allocate(4, None).unwrap();
        packet.extend(b"abc").unwrap();
        let err = packet.extend(b"de").unwrap_err();
        assert!(matches!(err, CodecError::Overflow { needed: 2, available: 1 }));
        assert_eq!(packet.fill(b"de"), 1);
        assert_eq!(packet.data(), b"abcd");
    }

    #[test]
    fn test_reserved_region() {
        let mut packet = Packet::with_reserved(64, 16).unwrap();
        assert_eq!(packet.reserved(), 16);
        assert_eq!(packet.data_len(), 0);
        packet.extend(b"tds").unwrap();
        assert_eq!(packet.data(), b"tds");
        assert_eq!(packet.remaining(), 64 - 16 - 3);
        packet.clear();
        assert_eq!(packet.data_len(), 0);
        assert_eq!(packet.reserved(), 16);
    }

    #[test]
    fn test_chain_fifo() {
        let mut chain = PacketChain::new();
        for (sid, body) in [(0u16, b"a"), (2, b"b"), (0, b"c")] {
            let mut packet = Packet::allocate(8, Some(&body[..])).unwrap();
            packet.set_sid(sid);
            chain.push_back(packet);
        }
        assert_eq!(chain.len(), 3);

        let taken = chain.take_for_sid(2).unwrap();
        assert_eq!(taken.data(), b"b");
        assert!(chain.take_for_sid(2).is_none());

        let order: Vec<_> = chain.iter().map(|p| p.data().to_vec()).collect();
        assert_eq!(order, vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(chain.pop_front().unwrap().data(), b"a");
        assert_eq!(chain.clear(), 1);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_free_long_chain() {
        let mut chain = PacketChain::new();
        let mut head: Option<Box<Packet>> = None;
        for _ in 0..100_000 {
            let mut packet = Packet::allocate(1, None).unwrap();
            packet.set_next(head.take());
            head = Some(Box::new(packet));
        }
        assert_eq!(free_chain(head), 100_000);
        assert_eq!(chain.clear(), 0);
    }

    proptest! {
        #[test]
        fn growing_preserves_written_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..256),
            extra in 0usize..4096,
        ) {
            let mut packet = Packet::allocate(data.len(), Some(&data[..])).unwrap();
            let before = packet.capacity();
            packet.grow(before + extra).unwrap();
            prop_assert_eq!(packet.data(), &data[..]);
            prop_assert_eq!(packet.capacity(), before + extra);
            prop_assert!(packet.data_len() <= packet.capacity());
        }
    }
}
