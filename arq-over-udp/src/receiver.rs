//! Inbound segment reassembly shared by all three ARQ variants.
//!
//! The [`Receiver`] is responsible for everything that happens *after* a
//! raw datagram is decoded into a data segment and *before* the
//! application receives the finished byte sequence:
//! - Accepting in-order segments and advancing `expected`.
//! - Applying the protocol's out-of-order policy: Stop-and-Wait and
//!   Go-Back-N discard, Selective-Repeat buffers and acknowledges.
//! - Recognising duplicates and still acknowledging them, so a sender
//!   whose earlier ACK was lost can make progress.
//! - Computing the acknowledgement number for each reply.
//!
//! The [`Receiver`] does **not** send ACKs itself; it returns the values
//! that [`crate::transfer`] uses when constructing ACK packets.
//!
//! Offsets are stream-relative; `base` is the wire sequence number of
//! offset 0 (the peer's initial sequence number plus one).  Selective-Repeat
//! only buffers segments that start less than `window` bytes past
//! `expected`; anything further out (including sequence numbers below
//! `base`, which wrap to huge offsets) is discarded.

use crate::buffer::ReceiveBuffer;
use crate::protocol::Protocol;

/// What the receiver did with one data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// In-order segment appended; `expected` advanced.
    Delivered { offset: u32, len: usize, ack_num: u32 },
    /// Out-of-order segment kept for later (Selective-Repeat).
    Buffered { offset: u32, len: usize, ack_num: u32 },
    /// Data at or behind `expected`; `stored` is `true` if the offset had
    /// not been recorded before.
    Duplicate { offset: u32, stored: bool, ack_num: u32 },
    /// Out-of-order segment dropped without reply (Stop-and-Wait, Go-Back-N).
    Discarded { offset: u32 },
}

impl SegmentOutcome {
    /// Acknowledgement number to reply with, if any.
    pub fn ack_num(&self) -> Option<u32> {
        match *self {
            Self::Delivered { ack_num, .. }
            | Self::Buffered { ack_num, .. }
            | Self::Duplicate { ack_num, .. } => Some(ack_num),
            Self::Discarded { .. } => None,
        }
    }
}

/// Receive-side state for one transfer.
#[derive(Debug, Clone)]
pub struct Receiver {
    protocol: Protocol,
    /// Wire sequence number of stream offset 0.
    base: u32,
    /// Next offset expected in order.
    expected: u32,
    /// Bytes past `expected` a buffered segment may start at.
    window: u32,
    buffer: ReceiveBuffer,
}

impl Receiver {
    /// `window` is the sender's window in bytes (packets × payload size).
    pub fn new(protocol: Protocol, base: u32, window: u32) -> Self {
        Self {
            protocol,
            base,
            expected: 0,
            window,
            buffer: ReceiveBuffer::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Next offset expected in order.
    pub fn expected_offset(&self) -> u32 {
        self.expected
    }

    /// Cumulative acknowledgement number (`base + expected`).
    pub fn ack_number(&self) -> u32 {
        self.base.wrapping_add(self.expected)
    }

    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    /// Stream offset of the wire sequence number `seq`.
    pub fn offset_of(&self, seq: u32) -> u32 {
        seq.wrapping_sub(self.base)
    }

    /// Process one data segment with a non-empty payload.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> SegmentOutcome {
        let offset = self.offset_of(seq);
        let len = payload.len();
        let selective_ack = self.base.wrapping_add(offset).wrapping_add(len as u32);

        if offset == self.expected {
            self.buffer.insert(offset, payload);
            self.expected = offset.wrapping_add(len as u32);

            let ack_num = if self.protocol.buffers_out_of_order() {
                self.absorb_buffered_run();
                selective_ack
            } else {
                self.ack_number()
            };
            return SegmentOutcome::Delivered {
                offset,
                len,
                ack_num,
            };
        }

        if offset > self.expected {
            if !self.protocol.buffers_out_of_order()
                || offset.wrapping_sub(self.expected) >= self.window
            {
                return SegmentOutcome::Discarded { offset };
            }
            return if self.buffer.insert(offset, payload) {
                SegmentOutcome::Buffered {
                    offset,
                    len,
                    ack_num: selective_ack,
                }
            } else {
                SegmentOutcome::Duplicate {
                    offset,
                    stored: false,
                    ack_num: selective_ack,
                }
            };
        }

        let stored = self.buffer.insert(offset, payload);
        SegmentOutcome::Duplicate {
            offset,
            stored,
            ack_num: selective_ack,
        }
    }

    /// Advance `expected` across segments that were buffered out of order
    /// and are now contiguous.
    fn absorb_buffered_run(&mut self) {
        while let Some(len) = self.buffer.segment_len(self.expected) {
            if len == 0 {
                break;
            }
            self.expected = self.expected.wrapping_add(len as u32);
        }
    }

    /// Flatten the received segments into the delivered byte sequence and
    /// reset for the next transfer.
    pub fn finish(&mut self) -> Vec<u8> {
        let data = self.buffer.assemble();
        self.buffer.clear();
        self.expected = 0;
        data
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
