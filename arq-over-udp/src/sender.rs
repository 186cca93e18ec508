//! Outbound side shared by every ARQ variant, plus Stop-and-Wait.
//!
//! A sender engine is a pure state machine.  It does **not** touch the
//! socket; [`crate::transfer`] calls these methods, puts the returned
//! packets on the wire (subject to fault injection) and owns the timer.
//!
//! All engines work in stream-relative offsets: the first payload byte of
//! a transfer is offset 0.  A [`Framer`] maps offsets to wire sequence
//! numbers and back.
//!
//! # Stop-and-Wait contract
//! - At most **one** segment is in flight at any moment.
//! - On an ACK equal to `offset + len` of that segment: retire it and cut
//!   the next chunk.
//! - On timeout: resend the buffered packet unchanged.

use crate::buffer::SendBuffer;
use crate::gbn_sender::GoBackN;
use crate::packet::{flags, Packet};
use crate::protocol::Protocol;
use crate::sr_sender::SelectiveRepeat;

// ---------------------------------------------------------------------------
// Framer
// ---------------------------------------------------------------------------

/// Header template for the data packets of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    /// Wire sequence number of stream offset 0.
    pub base: u32,
    /// Acknowledgement number carried by every data packet.
    pub ack: u32,
    /// Advertised window carried by every data packet.
    pub window: u16,
}

impl Framer {
    pub fn new(base: u32, ack: u32, window: u16) -> Self {
        Self { base, ack, window }
    }

    /// Build the data packet for `payload` starting at `offset`.
    ///
    /// Data packets always carry the ACK flag.
    pub fn data_packet(&self, offset: u32, payload: Vec<u8>) -> Packet {
        Packet::new(
            self.base.wrapping_add(offset),
            self.ack,
            flags::ACK,
            self.window,
            payload,
        )
    }

    /// Stream offset named by a wire acknowledgement number.
    pub fn ack_offset(&self, ack_num: u32) -> u32 {
        ack_num.wrapping_sub(self.base)
    }
}

// ---------------------------------------------------------------------------
// Engine I/O types
// ---------------------------------------------------------------------------

/// A packet the engine wants on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub offset: u32,
    pub packet: Packet,
    /// `true` when this is a resend of a buffered packet.
    pub retransmission: bool,
}

/// Result of feeding one acknowledgement to an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// `(offset, len)` of every packet retired by this ACK.
    pub acknowledged: Vec<(u32, usize)>,
    /// New packets cut to refill the window.
    pub transmit: Vec<Outgoing>,
}

impl AckOutcome {
    /// `true` if the ACK changed nothing.
    pub fn is_noop(&self) -> bool {
        self.acknowledged.is_empty() && self.transmit.is_empty()
    }
}

/// The capability every ARQ sender provides.
pub trait ArqSender {
    /// Cut the initial burst.
    fn open(&mut self) -> Vec<Outgoing>;

    /// Process one wire acknowledgement number.
    fn on_ack(&mut self, ack_num: u32) -> AckOutcome;

    /// The retransmission deadline passed.
    fn on_timeout(&mut self) -> Vec<Outgoing>;

    /// Buffered packets awaiting acknowledgement.
    fn outstanding(&self) -> &SendBuffer;

    /// Every byte has been sent and acknowledged.
    fn is_complete(&self) -> bool;

    /// Offset of the oldest unacknowledged packet.
    fn oldest_unacked(&self) -> Option<u32> {
        self.outstanding().oldest_offset()
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Chunking and send-buffer bookkeeping shared by all engines.
#[derive(Debug, Clone)]
pub struct Outbound {
    data: Vec<u8>,
    chunk: usize,
    /// Offset of the first byte not yet cut into a packet.
    next_offset: u32,
    buffer: SendBuffer,
    framer: Framer,
}

impl Outbound {
    /// `data` must be shorter than `u32::MAX` bytes; `chunk` must be non-zero.
    pub fn new(data: Vec<u8>, chunk: usize, framer: Framer) -> Self {
        debug_assert!(chunk > 0, "chunk size must be non-zero");
        debug_assert!(data.len() < u32::MAX as usize, "transfer too large");
        Self {
            data,
            chunk,
            next_offset: 0,
            buffer: SendBuffer::new(),
            framer,
        }
    }

    pub fn total_len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub fn buffer(&self) -> &SendBuffer {
        &self.buffer
    }

    /// `true` while bytes remain that were never cut into a packet.
    pub fn has_unsent(&self) -> bool {
        (self.next_offset as usize) < self.data.len()
    }

    /// Length of the final chunk, which may be shorter than the rest.
    pub fn last_chunk_len(&self) -> usize {
        match self.data.len() % self.chunk {
            0 if self.data.is_empty() => 0,
            0 => self.chunk,
            rem => rem,
        }
    }

    /// Cut the next chunk, record it in the send buffer and return it.
    pub fn send_next(&mut self) -> Option<Outgoing> {
        if !self.has_unsent() {
            return None;
        }
        let start = self.next_offset as usize;
        let end = (start + self.chunk).min(self.data.len());
        let offset = self.next_offset;
        let packet = self.framer.data_packet(offset, self.data[start..end].to_vec());

        self.buffer.insert(offset, packet.clone());
        self.next_offset = end as u32;
        Some(Outgoing {
            offset,
            packet,
            retransmission: false,
        })
    }

    /// Cut chunks until `window` packets are outstanding or the data runs
    /// out.
    pub fn fill(&mut self, window: usize) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while self.buffer.len() < window {
            match self.send_next() {
                Some(o) => out.push(o),
                None => break,
            }
        }
        out
    }

    /// Retire the packet at `offset`, returning its length.
    pub fn retire(&mut self, offset: u32) -> Option<usize> {
        self.buffer.remove(offset).map(|e| e.len())
    }

    /// Resend the buffered packet at `offset` unchanged.
    pub fn resend(&mut self, offset: u32) -> Option<Outgoing> {
        self.buffer
            .mark_retransmitted(offset)
            .map(|packet| Outgoing {
                offset,
                packet,
                retransmission: true,
            })
    }

    /// Every byte cut and every packet retired.
    pub fn is_complete(&self) -> bool {
        !self.has_unsent() && self.buffer.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stop-and-Wait
// ---------------------------------------------------------------------------

/// Stop-and-Wait send-side state for one transfer.
#[derive(Debug, Clone)]
pub struct StopAndWait {
    out: Outbound,
}

impl StopAndWait {
    pub fn new(data: Vec<u8>, chunk: usize, framer: Framer) -> Self {
        Self {
            out: Outbound::new(data, chunk, framer),
        }
    }
}

impl ArqSender for StopAndWait {
    fn open(&mut self) -> Vec<Outgoing> {
        self.out.fill(1)
    }

    fn on_ack(&mut self, ack_num: u32) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let Some((offset, entry)) = self.out.buffer().oldest() else {
            return outcome;
        };
        // The ACK we expect is offset + payload_len, nothing else.
        let expected = offset.wrapping_add(entry.len() as u32);
        if self.out.framer().ack_offset(ack_num) != expected {
            return outcome;
        }
        if let Some(len) = self.out.retire(offset) {
            outcome.acknowledged.push((offset, len));
        }
        outcome.transmit = self.out.fill(1);
        outcome
    }

    fn on_timeout(&mut self) -> Vec<Outgoing> {
        self.oldest_unacked()
            .and_then(|offset| self.out.resend(offset))
            .into_iter()
            .collect()
    }

    fn outstanding(&self) -> &SendBuffer {
        self.out.buffer()
    }

    fn is_complete(&self) -> bool {
        self.out.is_complete()
    }
}

// ---------------------------------------------------------------------------
// SenderEngine
// ---------------------------------------------------------------------------

/// Closed dispatch over the three ARQ senders.
#[derive(Debug, Clone)]
pub enum SenderEngine {
    StopAndWait(StopAndWait),
    GoBackN(GoBackN),
    SelectiveRepeat(SelectiveRepeat),
}

impl SenderEngine {
    /// Build the engine for `protocol`.  `window` is ignored by Stop-and-Wait.
    pub fn new(
        protocol: Protocol,
        data: Vec<u8>,
        chunk: usize,
        window: usize,
        framer: Framer,
    ) -> Self {
        match protocol {
            Protocol::StopAndWait => Self::StopAndWait(StopAndWait::new(data, chunk, framer)),
            Protocol::GoBackN => Self::GoBackN(GoBackN::new(data, chunk, window, framer)),
            Protocol::SelectiveRepeat => {
                Self::SelectiveRepeat(SelectiveRepeat::new(data, chunk, window, framer))
            }
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::StopAndWait(_) => Protocol::StopAndWait,
            Self::GoBackN(_) => Protocol::GoBackN,
            Self::SelectiveRepeat(_) => Protocol::SelectiveRepeat,
        }
    }

    fn inner(&self) -> &dyn ArqSender {
        match self {
            Self::StopAndWait(s) => s,
            Self::GoBackN(s) => s,
            Self::SelectiveRepeat(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ArqSender {
        match self {
            Self::StopAndWait(s) => s,
            Self::GoBackN(s) => s,
            Self::SelectiveRepeat(s) => s,
        }
    }
}

impl ArqSender for SenderEngine {
    fn open(&mut self) -> Vec<Outgoing> {
        self.inner_mut().open()
    }

    fn on_ack(&mut self, ack_num: u32) -> AckOutcome {
        self.inner_mut().on_ack(ack_num)
    }

    fn on_timeout(&mut self) -> Vec<Outgoing> {
        self.inner_mut().on_timeout()
    }

    fn outstanding(&self) -> &SendBuffer {
        self.inner().outstanding()
    }

    fn is_complete(&self) -> bool {
        self.inner().is_complete()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> Framer {
        Framer::new(0, 1, 1)
    }

    fn offsets(out: &[Outgoing]) -> Vec<u32> {
        out.iter().map(|o| o.offset).collect()
    }

    #[test]
    fn framer_translates_offsets() {
        let f = Framer::new(1, 77, 4);
        let p = f.data_packet(1000, vec![0u8; 3]);
        assert_eq!(p.header.seq, 1001);
        assert_eq!(p.header.ack, 77);
        assert_eq!(p.header.flags, flags::ACK);
        assert_eq!(p.header.window, 4);
        assert_eq!(f.ack_offset(1004), 1003);
    }

    #[test]
    fn outbound_clips_last_chunk() {
        let mut out = Outbound::new(vec![7u8; 2500], 1000, framer());
        let sent = out.fill(10);
        assert_eq!(offsets(&sent), [0, 1000, 2000]);
        assert_eq!(sent[2].packet.payload.len(), 500);
        assert_eq!(out.last_chunk_len(), 500);
        assert!(!out.has_unsent());
    }

    #[test]
    fn last_chunk_len_exact_multiple_and_empty() {
        assert_eq!(Outbound::new(vec![0; 3000], 1000, framer()).last_chunk_len(), 1000);
        assert_eq!(Outbound::new(Vec::new(), 1000, framer()).last_chunk_len(), 0);
    }

    #[test]
    fn saw_sends_one_chunk_at_a_time() {
        let mut s = StopAndWait::new(vec![1u8; 2500], 1000, framer());
        let first = s.open();
        assert_eq!(offsets(&first), [0]);
        assert_eq!(s.outstanding().len(), 1);

        let outcome = s.on_ack(1000);
        assert_eq!(outcome.acknowledged, [(0, 1000)]);
        assert_eq!(offsets(&outcome.transmit), [1000]);

        let outcome = s.on_ack(2000);
        assert_eq!(offsets(&outcome.transmit), [2000]);
        assert_eq!(outcome.transmit[0].packet.payload.len(), 500);

        let outcome = s.on_ack(2500);
        assert_eq!(outcome.acknowledged, [(2000, 500)]);
        assert!(outcome.transmit.is_empty());
        assert!(s.is_complete());
    }

    #[test]
    fn saw_ignores_wrong_ack() {
        let mut s = StopAndWait::new(vec![1u8; 2000], 1000, framer());
        s.open();
        assert!(s.on_ack(500).is_noop());
        assert!(s.on_ack(2000).is_noop());
        assert_eq!(s.oldest_unacked(), Some(0));
    }

    #[test]
    fn saw_timeout_resends_identical_packet() {
        let mut s = StopAndWait::new(vec![1u8; 2000], 1000, framer());
        let first = s.open();
        let again = s.on_timeout();
        assert_eq!(again.len(), 1);
        assert!(again[0].retransmission);
        assert_eq!(again[0].packet, first[0].packet);
        assert_eq!(s.outstanding().get(0).unwrap().tx_count, 2);
    }

    #[test]
    fn saw_empty_transfer_is_complete_immediately() {
        let mut s = StopAndWait::new(Vec::new(), 1000, framer());
        assert!(s.open().is_empty());
        assert!(s.is_complete());
        assert!(s.on_timeout().is_empty());
    }

    #[test]
    fn engine_dispatches_by_protocol() {
        for p in Protocol::ALL {
            let mut e = SenderEngine::new(p, vec![0u8; 4500], 1000, 4, framer());
            assert_eq!(e.protocol(), p);
            let burst = e.open();
            let expected = if p == Protocol::StopAndWait { 1 } else { 4 };
            assert_eq!(burst.len(), expected, "{p}");
        }
    }
}
