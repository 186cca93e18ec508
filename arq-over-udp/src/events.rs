//! Transfer events and counters.
//!
//! The transport never prints.  Callers that want to report loss and
//! retransmission install an observer with
//! [`crate::connection::Connection::set_observer`]; every event is also
//! logged through the `log` facade.
//!
//! Data-carrying events use stream-relative byte offsets (the first payload
//! byte of a transfer is offset 0), not wire sequence numbers.

use std::fmt;

/// Something observable that happened during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// A data packet went on the wire for the first time.
    Sent { offset: u32, len: usize },
    /// A buffered data packet was sent again after a timeout.
    Retransmitted { offset: u32, len: usize },
    /// The fault injector swallowed a data packet.
    Lost { offset: u32, len: usize },
    /// The fault injector swallowed a control packet (ACK, FIN, FIN-ACK).
    AckLost { ack: u32 },
    /// The sender retired the packet at `offset`.
    Acknowledged { offset: u32, len: usize },
    /// The receiver accepted an in-order segment.
    Delivered { offset: u32, len: usize },
    /// The receiver kept an out-of-order segment (Selective-Repeat only).
    Buffered { offset: u32, len: usize },
    /// The receiver saw data it already had.
    Duplicate { offset: u32 },
    /// The receiver dropped an out-of-order segment.
    Discarded { offset: u32 },
    /// Teardown timed out and FIN went out again.
    FinResent,
    /// A duplicate FIN was answered with another FIN-ACK.
    FinAckResent,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Sent { offset, len } => write!(f, "sent offset={offset} len={len}"),
            Self::Retransmitted { offset, len } => {
                write!(f, "retransmitted offset={offset} len={len}")
            }
            Self::Lost { offset, len } => write!(f, "lost packet offset={offset} len={len}"),
            Self::AckLost { ack } => write!(f, "lost ack ack={ack}"),
            Self::Acknowledged { offset, len } => {
                write!(f, "acknowledged offset={offset} len={len}")
            }
            Self::Delivered { offset, len } => write!(f, "delivered offset={offset} len={len}"),
            Self::Buffered { offset, len } => {
                write!(f, "buffered out-of-order offset={offset} len={len}")
            }
            Self::Duplicate { offset } => write!(f, "duplicate offset={offset}"),
            Self::Discarded { offset } => write!(f, "discarded out-of-order offset={offset}"),
            Self::FinResent => f.write_str("resending FIN"),
            Self::FinAckResent => f.write_str("resending FIN-ACK"),
        }
    }
}

/// Callback invoked for every [`TransferEvent`].
pub type Observer = Box<dyn FnMut(&TransferEvent) + Send + Sync>;

/// Per-transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Data packets sent for the first time.
    pub packets_sent: u64,
    /// Data packets sent again after a timeout.
    pub retransmissions: u64,
    /// Sends swallowed by the fault injector.
    pub simulated_losses: u64,
    /// Duplicate segments seen by the receiver.
    pub duplicates: u64,
    /// Payload bytes acknowledged (sender) or delivered (receiver).
    pub bytes: u64,
}

impl TransferStats {
    /// Fold one event into the counters.
    pub fn record(&mut self, event: &TransferEvent) {
        match *event {
            TransferEvent::Sent { .. } => self.packets_sent += 1,
            TransferEvent::Retransmitted { .. } => self.retransmissions += 1,
            TransferEvent::Lost { .. } | TransferEvent::AckLost { .. } => {
                self.simulated_losses += 1
            }
            TransferEvent::Duplicate { .. } => self.duplicates += 1,
            TransferEvent::Acknowledged { len, .. }
            | TransferEvent::Delivered { len, .. }
            | TransferEvent::Buffered { len, .. } => self.bytes += len as u64,
            _ => {}
        }
    }
}
