//! Packet staging cache.
//!
//! Sessions hand finished packets back here instead of freeing them, and take
//! packets from here before allocating. The cache is bounded and owned by a
//! connection, which releases it at teardown.

use crate::error::CodecError;
use crate::packet::{Packet, PacketChain};

/// Default number of packets kept for reuse.
pub const DEFAULT_CACHE_PACKETS: usize = 8;

/// Bounded free list of packets.
#[derive(Debug)]
pub struct PacketCache {
    free: PacketChain,
    max_packets: usize,
}

impl PacketCache {
    /// Create a cache holding at most `max_packets` idle packets.
    #[must_use]
    pub fn new(max_packets: usize) -> Self {
        Self {
            free: PacketChain::new(),
            max_packets,
        }
    }

    /// Number of idle packets held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Whether the cache holds no packets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Take a cleared packet with at least `capacity` bytes.
    ///
    /// Reuses the oldest cached packet, growing it if needed, and allocates a
    /// fresh one when the cache is empty.
    pub fn take(&mut self, capacity: usize) -> Result<Packet, CodecError> {
        match self.free.pop_front() {
            Some(mut packet) => {
                packet.clear();
                packet.set_sid(0);
                packet.set_envelope(None);
                if let Err(e) = packet.grow(capacity) {
                    self.free.push_back(packet);
                    return Err(e);
                }
                Ok(packet)
            }
            None => Packet::allocate(capacity, None),
        }
    }

    /// Return a packet for reuse. Frees it when the cache is full.
    pub fn give_back(&mut self, mut packet: Packet) {
        if self.free.len() >= self.max_packets {
            return;
        }
        // Chains must not be cached as a unit.
        drop(packet.take_next());
        self.free.push_back(packet);
    }

    /// Free every cached packet, returning how many were released.
    pub fn clear(&mut self) -> usize {
        let freed = self.free.clear();
        if freed > 0 {
            tracing::trace!(freed, "released packet cache");
        }
        freed
    }
}

impl Default for PacketCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PACKETS)
    }
}
