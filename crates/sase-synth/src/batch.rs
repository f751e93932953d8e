//! Packet batches
//!
//! A batch is an ordered run of packets handed between stages as one unit.
//! [`PacketBatch::apply`] is the only place a per-packet operation is lifted
//! to a batch, so every stage gets batch mode without a second code path.

use crate::buffer::Packet;

/// Ordered sequence of packets
#[derive(Debug, Default)]
pub struct PacketBatch {
    packets: Vec<Packet>,
}

impl PacketBatch {
    /// Create new batch with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self { packets: Vec::with_capacity(capacity) }
    }

    /// Add packet to the tail of the batch
    pub fn push(&mut self, pkt: Packet) {
        self.packets.push(pkt);
    }

    /// Get batch length
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Iterate over packets in order
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    /// Release the packets
    pub fn into_vec(self) -> Vec<Packet> {
        self.packets
    }

    /// Run `f` over every packet in order. Packets for which `f` returns
    /// `None` are removed; survivors keep their relative order.
    #[inline]
    pub fn apply<F>(self, f: F) -> PacketBatch
    where
        F: FnMut(Packet) -> Option<Packet>,
    {
        Self { packets: self.packets.into_iter().filter_map(f).collect() }
    }
}

impl From<Vec<Packet>> for PacketBatch {
    fn from(packets: Vec<Packet>) -> Self {
        Self { packets }
    }
}

impl FromIterator<Packet> for PacketBatch {
    fn from_iter<I: IntoIterator<Item = Packet>>(iter: I) -> Self {
        Self { packets: iter.into_iter().collect() }
    }
}

impl IntoIterator for PacketBatch {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.into_iter()
    }
}
