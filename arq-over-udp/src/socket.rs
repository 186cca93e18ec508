//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and bounded waiting.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::packet::{Packet, PacketError};

/// Maximum UDP payload size.
pub const MAX_DATAGRAM: usize = 65_507;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The received datagram could not be decoded as a valid packet.
    #[error("packet decode error: {0}")]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// RecvEvent
// ---------------------------------------------------------------------------

/// Outcome of one bounded wait on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvEvent {
    /// A well-formed packet arrived from `from`.
    Packet { packet: Packet, from: SocketAddr },
    /// The deadline passed with nothing usable received.
    Timeout,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&packet.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err`; the caller decides whether to retry.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }

    /// Wait for a well-formed packet until `deadline`.
    ///
    /// Malformed datagrams are dropped and the wait continues against the
    /// same deadline.  Only OS-level I/O failures are returned as errors.
    pub async fn recv_until(&self, deadline: Instant) -> Result<RecvEvent, SocketError> {
        loop {
            match tokio::time::timeout_at(deadline, self.recv_from()).await {
                Err(_elapsed) => return Ok(RecvEvent::Timeout),
                Ok(Ok((packet, from))) => return Ok(RecvEvent::Packet { packet, from }),
                Ok(Err(SocketError::Packet(e))) => {
                    log::debug!("[socket] dropping malformed datagram: {e}");
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}
