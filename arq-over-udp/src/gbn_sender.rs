//! Go-Back-N send-side state machine.
//!
//! [`GoBackN`] maintains a sliding window of up to `N` in-flight packets.
//! Unlike stop-and-wait, multiple packets may be outstanding simultaneously.
//!
//! # Protocol contract
//!
//! - At most `window_size` packets may be in flight at once.
//! - ACKs are **cumulative**: an acknowledgement for offset `K` means the
//!   receiver holds every byte before `K`.  Each packet it covers is retired
//!   oldest first, and each retirement frees a slot that is refilled from
//!   the unsent data immediately.
//! - On timeout, **every** buffered packet is resent in ascending offset
//!   order (go back to N).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use crate::buffer::SendBuffer;
use crate::sender::{AckOutcome, ArqSender, Framer, Outbound, Outgoing};

/// Go-Back-N send-side state for one transfer.
///
/// ```text
///  oldest unacked      next_offset
///      │                  │
///  ────┼──────────────────┼──────────────────▶ offset space
///      │ <── in flight ──▶│ <── unsent ─────▶
/// ```
#[derive(Debug, Clone)]
pub struct GoBackN {
    out: Outbound,
    /// Maximum number of packets that may be in flight simultaneously (N).
    window_size: usize,
}

impl GoBackN {
    /// `window_size` is the window N (at least 1).
    pub fn new(data: Vec<u8>, chunk: usize, window_size: usize, framer: Framer) -> Self {
        Self {
            out: Outbound::new(data, chunk, framer),
            window_size: window_size.max(1),
        }
    }

    /// `true` when there is room for at least one more in-flight packet.
    fn can_send(&self) -> bool {
        self.out.buffer().len() < self.window_size && self.out.has_unsent()
    }
}

impl ArqSender for GoBackN {
    fn open(&mut self) -> Vec<Outgoing> {
        self.out.fill(self.window_size)
    }

    fn on_ack(&mut self, ack_num: u32) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let acked = self.out.framer().ack_offset(ack_num);

        // Reject ACKs for data that was never cut.
        if acked > self.out.next_offset() {
            return outcome;
        }

        while let Some((offset, entry)) = self.out.buffer().oldest() {
            let end = offset + entry.len() as u32;
            if end > acked {
                break;
            }
            if let Some(len) = self.out.retire(offset) {
                outcome.acknowledged.push((offset, len));
            }
            if !self.can_send() {
                continue;
            }
            if let Some(next) = self.out.send_next() {
                outcome.transmit.push(next);
            }
        }
        outcome
    }

    fn on_timeout(&mut self) -> Vec<Outgoing> {
        let offsets: Vec<u32> = self.out.buffer().offsets().collect();
        offsets
            .into_iter()
            .filter_map(|offset| self.out.resend(offset))
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
