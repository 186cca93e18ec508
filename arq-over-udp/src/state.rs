//! Connection finite-state machine (FSM) types.
//!
//! Every state a [`crate::connection::Connection`] can occupy.  Transitions
//! live in [`crate::connection`] and [`crate::transfer`]; this module only
//! names them.
//!
//! ```text
//!  client:  Closed ──SYN──▶ SynSent ──SYN-ACK / ACK──▶ Established
//!  server:  Listen ──SYN / SYN-ACK──▶ SynReceived ──ACK──▶ Established
//!
//!  Established ──FIN sent or FIN received──▶ Closing ──FIN-ACK──▶ Closed
//! ```
//!
//! A server whose half-open attempt times out falls back from
//! `SynReceived` to `Listen`.

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial client state and final state.
    #[default]
    Closed,
    /// Server waiting for a SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received; SYN-ACK sent; waiting for ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// FIN exchanged or in progress.
    Closing,
}

impl ConnectionState {
    /// `true` while data may flow.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}
