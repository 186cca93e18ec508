//! Offset-keyed send and receive buffers.
//!
//! Both buffers are ordered maps keyed by stream-relative byte offset, so
//! "oldest outstanding" and "in ascending order" fall out of the key order
//! instead of ad hoc key arithmetic in every protocol.

use std::collections::BTreeMap;

use crate::packet::Packet;

// ---------------------------------------------------------------------------
// SendBuffer
// ---------------------------------------------------------------------------

/// A packet that has been handed to the wire but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// The exact packet last transmitted at this offset.
    pub packet: Packet,
    /// Total number of transmissions (1 = first send).
    pub tx_count: u32,
}

impl InFlight {
    /// Payload length of the buffered packet.
    pub fn len(&self) -> usize {
        self.packet.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet.payload.is_empty()
    }
}

/// Unacknowledged packets, the sole source for retransmission.
///
/// An entry exists for an offset exactly while its packet is outstanding.
#[derive(Debug, Clone, Default)]
pub struct SendBuffer {
    entries: BTreeMap<u32, InFlight>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first transmission of `packet` at `offset`.
    pub fn insert(&mut self, offset: u32, packet: Packet) {
        self.entries.insert(
            offset,
            InFlight {
                packet,
                tx_count: 1,
            },
        );
    }

    /// Remove the packet at `offset`, returning it if it was outstanding.
    pub fn remove(&mut self, offset: u32) -> Option<InFlight> {
        self.entries.remove(&offset)
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.entries.contains_key(&offset)
    }

    pub fn get(&self, offset: u32) -> Option<&InFlight> {
        self.entries.get(&offset)
    }

    /// Offset and entry of the oldest unacknowledged packet.
    pub fn oldest(&self) -> Option<(u32, &InFlight)> {
        self.entries.iter().next().map(|(k, v)| (*k, v))
    }

    /// Offset of the oldest unacknowledged packet.
    pub fn oldest_offset(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    /// Count one more transmission of the packet at `offset` and return a
    /// copy of it for the wire.
    pub fn mark_retransmitted(&mut self, offset: u32) -> Option<Packet> {
        self.entries.get_mut(&offset).map(|e| {
            e.tx_count += 1;
            e.packet.clone()
        })
    }

    /// Outstanding offsets in ascending order.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Outstanding entries in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &InFlight)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// ReceiveBuffer
// ---------------------------------------------------------------------------

/// Accepted payloads keyed by offset, flattened once the transfer ends.
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    segments: BTreeMap<u32, Vec<u8>>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` at `offset` unless something is already recorded
    /// there.  Returns `true` if the payload was stored.
    pub fn insert(&mut self, offset: u32, payload: &[u8]) -> bool {
        if self.segments.contains_key(&offset) {
            return false;
        }
        self.segments.insert(offset, payload.to_vec());
        true
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.segments.contains_key(&offset)
    }

    /// Length of the payload stored at `offset`.
    pub fn segment_len(&self, offset: u32) -> Option<usize> {
        self.segments.get(&offset).map(Vec::len)
    }

    /// Recorded offsets in ascending order.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenate every segment in ascending offset order.
    ///
    /// Bytes already covered by an earlier segment are skipped, so an
    /// overlapping duplicate never repeats data in the output.
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.segments.values().map(Vec::len).sum());
        let mut covered: u64 = 0;

        for (&offset, payload) in &self.segments {
            let start = u64::from(offset);
            let end = start + payload.len() as u64;
            if end <= covered {
                continue;
            }
            let skip = covered.saturating_sub(start) as usize;
            out.extend_from_slice(&payload[skip..]);
            covered = end;
        }
        out
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
