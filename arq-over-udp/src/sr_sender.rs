//! Selective-Repeat send-side state machine.
//!
//! Every buffered packet is retired on its **own** acknowledgement,
//! regardless of arrival order.  The receiver answers each segment with
//! `offset + len`, so the acknowledged offset is recovered by subtracting
//! the chunk size, or the length of the final shorter chunk when the ACK
//! names the end of the data.
//!
//! Only the oldest outstanding packet is ever retransmitted; the caller
//! runs a single head-of-line deadline and restarts it when
//! [`ArqSender::oldest_unacked`] changes.

use crate::buffer::SendBuffer;
use crate::sender::{AckOutcome, ArqSender, Framer, Outbound, Outgoing};

/// Selective-Repeat send-side state for one transfer.
#[derive(Debug, Clone)]
pub struct SelectiveRepeat {
    out: Outbound,
    window_size: usize,
}

impl SelectiveRepeat {
    pub fn new(data: Vec<u8>, chunk: usize, window_size: usize, framer: Framer) -> Self {
        Self {
            out: Outbound::new(data, chunk, framer),
            window_size: window_size.max(1),
        }
    }

    /// Offset of the packet whose selective ACK carries `acked` (the offset
    /// one past its last byte).
    fn acked_packet(&self, acked: u32) -> Option<u32> {
        let chunk_len = if acked == self.out.total_len() {
            self.out.last_chunk_len()
        } else {
            self.out.chunk_size()
        };
        acked.checked_sub(chunk_len as u32)
    }
}

impl ArqSender for SelectiveRepeat {
    fn open(&mut self) -> Vec<Outgoing> {
        self.out.fill(self.window_size)
    }

    fn on_ack(&mut self, ack_num: u32) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let acked = self.out.framer().ack_offset(ack_num);

        let Some(offset) = self.acked_packet(acked) else {
            return outcome;
        };
        // Already retired (duplicate ACK) or never sent: leave state alone.
        match self.out.buffer().get(offset) {
            Some(entry) if offset + entry.len() as u32 == acked => {}
            _ => return outcome,
        }

        if let Some(len) = self.out.retire(offset) {
            outcome.acknowledged.push((offset, len));
        }
        outcome.transmit = self.out.fill(self.window_size);
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
// Unit tests
// ---------------------------------------------------------------------------
