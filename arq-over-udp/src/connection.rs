//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one transfer endpoint.  Its
//! responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - The three-way handshake, from either role.
//! - Sender-initiated teardown (FIN / FIN-ACK).
//! - Routing every non-handshake send through the [`FaultInjector`].
//! - Reporting [`TransferEvent`]s to the log and to an optional observer.
//!
//! Data transfer itself lives in [`crate::transfer`].
//!
//! # Sequence numbers
//!
//! Both sides start from the placeholder [`INITIAL_SEQ`].  SYN and FIN each
//! consume one sequence number, so the first data byte of a transfer
//! travels with wire seq `INITIAL_SEQ + 1`.
//!
//! # Lifetime
//!
//! One endpoint carries one transfer.  When the transfer completes, by
//! teardown or by abort, the socket is closed and the per-transfer state
//! (simulated-loss budget, queued packet, peer) is reset.

use std::net::SocketAddr;

use log::Level;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::events::{Observer, TransferEvent, TransferStats};
use crate::packet::{flags, Packet};
use crate::sender::Outgoing;
use crate::simulator::FaultInjector;
use crate::socket::{RecvEvent, Socket, SocketError};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

/// Initial sequence number used by both roles.
pub const INITIAL_SEQ: u32 = 0;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced to the caller of the transport.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// No SYN-ACK arrived within one timeout.
    #[error("connection attempt timed out")]
    HandshakeFailed,
    /// The operation needs a connected peer.
    #[error("no peer connected")]
    NotConnected,
    /// The local socket has already been closed.
    #[error("socket already closed")]
    SocketClosed,
    #[error("operation not allowed in state {0}")]
    BadState(ConnectionState),
    #[error("gave up after {0} consecutive timeouts")]
    MaxRetriesExceeded(u32),
    #[error("transfer of {0} bytes does not fit the sequence space")]
    PayloadTooLarge(usize),
    /// The peer aborted the connection.
    #[error("connection reset by peer")]
    Reset,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One endpoint of a reliable transfer over UDP.
pub struct Connection {
    state: ConnectionState,
    config: Config,
    socket: Option<Socket>,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    /// Our next wire sequence number.
    pub(crate) next_seq: u32,
    /// Next wire sequence number expected from the peer.
    pub(crate) rcv_nxt: u32,
    injector: FaultInjector,
    observer: Option<Observer>,
    pub(crate) stats: TransferStats,
    /// Data that completed the server handshake, replayed by the receive loop.
    pub(crate) pending: Option<Packet>,
}

impl Connection {
    /// Bind a new endpoint to `local_addr`.
    ///
    /// The fault injector is built from `config.loss_probability` and
    /// `config.max_simulated_losses`.
    pub async fn bind(local_addr: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = Socket::bind(local_addr).await?;
        let injector =
            FaultInjector::random(config.loss_probability, config.max_simulated_losses);
        log::debug!("[conn] bound to {}", socket.local_addr);

        Ok(Self {
            state: ConnectionState::Closed,
            local_addr: socket.local_addr,
            socket: Some(socket),
            config,
            peer: None,
            next_seq: INITIAL_SEQ,
            rcv_nxt: 0,
            injector,
            observer: None,
            stats: TransferStats::default(),
            pending: None,
        })
    }

    /// Replace the fault injector, e.g. with a seeded or scripted one.
    pub fn with_fault_injector(mut self, injector: FaultInjector) -> Self {
        self.injector = injector;
        self
    }

    /// Install a callback that sees every [`TransferEvent`].
    pub fn set_observer(&mut self, observer: impl FnMut(&TransferEvent) + Send + Sync + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Counters of the current or most recent transfer.
    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Simulated losses in the current transfer.
    pub fn simulated_losses(&self) -> u32 {
        self.injector.losses()
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: SYN, wait one timeout for SYN-ACK, then ACK.
    ///
    /// There is no retry here; on [`ConnError::HandshakeFailed`] the caller
    /// decides whether to try again.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        if self.state != ConnectionState::Closed {
            return Err(ConnError::BadState(self.state));
        }
        self.socket()?;
        self.peer = Some(peer);

        let syn = Packet::control(INITIAL_SEQ, 0, flags::SYN, self.window());
        self.send_handshake(&syn).await?;
        self.next_seq = INITIAL_SEQ.wrapping_add(1);
        self.state = ConnectionState::SynSent;
        log::debug!("[conn] → SYN to {peer}");

        let deadline = Instant::now() + self.config.timeout;
        loop {
            match self.recv_from_peer(deadline).await? {
                None => {
                    log::warn!("[conn] no SYN-ACK from {peer}; connection attempt failed");
                    self.state = ConnectionState::Closed;
                    self.peer = None;
                    self.next_seq = INITIAL_SEQ;
                    return Err(ConnError::HandshakeFailed);
                }
                Some(pkt) if pkt.header.has(flags::SYN | flags::ACK) => {
                    self.rcv_nxt = pkt.header.seq.wrapping_add(1);
                    break;
                }
                Some(pkt) => {
                    log::debug!("[conn] ignoring flags={:#06x} while in SYN_SENT", pkt.header.flags);
                }
            }
        }

        let ack = Packet::control(self.next_seq, self.rcv_nxt, flags::ACK, self.window());
        self.send_handshake(&ack).await?;
        self.state = ConnectionState::Established;
        log::info!("[conn] connected to {peer}");
        Ok(())
    }

    /// Passive open: wait for a SYN, answer SYN-ACK, wait one timeout for
    /// the ACK.
    ///
    /// Non-SYN datagrams are ignored while listening.  Once the SYN-ACK is
    /// out, a data segment or FIN from the peer also completes the handshake
    /// and is kept for the transfer.  A half-open attempt whose ACK never
    /// arrives is discarded and listening resumes.  Returns
    /// the address of the accepted peer.
    pub async fn listen(&mut self) -> Result<SocketAddr, ConnError> {
        if self.state != ConnectionState::Closed {
            return Err(ConnError::BadState(self.state));
        }
        log::info!("[conn] listening on {}", self.local_addr);

        loop {
            self.state = ConnectionState::Listen;
            let (peer, syn_seq) = self.await_syn().await?;

            self.peer = Some(peer);
            self.rcv_nxt = syn_seq.wrapping_add(1);
            let syn_ack = Packet::control(
                INITIAL_SEQ,
                self.rcv_nxt,
                flags::SYN | flags::ACK,
                self.window(),
            );
            self.send_handshake(&syn_ack).await?;
            self.next_seq = INITIAL_SEQ.wrapping_add(1);
            self.state = ConnectionState::SynReceived;
            log::debug!("[conn] ← SYN from {peer}; → SYN-ACK");

            let deadline = Instant::now() + self.config.timeout;
            loop {
                match self.recv_from_peer(deadline).await? {
                    None => break,
                    Some(pkt) if pkt.header.is_syn() => {
                        // Our SYN-ACK went missing and the peer retried.
                        self.send_handshake(&syn_ack).await?;
                    }
                    Some(pkt) if pkt.header.is_ack() || pkt.header.is_fin() => {
                        if !pkt.payload.is_empty() || pkt.header.is_fin() {
                            // Handshake ACK lost; the first data segment or
                            // the FIN of an empty transfer stands in for it.
                            self.pending = Some(pkt);
                        }
                        self.state = ConnectionState::Established;
                        log::info!("[conn] accepted connection from {peer}");
                        return Ok(peer);
                    }
                    Some(_) => {}
                }
            }

            log::warn!("[conn] no ACK from {peer}; discarding half-open connection");
            self.peer = None;
            self.next_seq = INITIAL_SEQ;
        }
    }

    /// Block until a SYN arrives from anyone.
    async fn await_syn(&self) -> Result<(SocketAddr, u32), ConnError> {
        let socket = self.socket()?;
        loop {
            let deadline = Instant::now() + self.config.timeout;
            match socket.recv_until(deadline).await? {
                RecvEvent::Packet { packet, from } if packet.header.is_syn() => {
                    return Ok((from, packet.header.seq));
                }
                RecvEvent::Packet { from, .. } => {
                    log::debug!("[conn] ignoring non-SYN datagram from {from} while listening");
                }
                RecvEvent::Timeout => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Sender-initiated teardown: FIN, resent on every timeout until a
    /// FIN-ACK arrives.
    ///
    /// Closing an already closed connection is a no-op.  With
    /// `config.max_retries` set, gives up after that many resends.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Established | ConnectionState::Closing => {}
            other => return Err(ConnError::BadState(other)),
        }
        self.state = ConnectionState::Closing;

        let fin = Packet::control(self.next_seq, self.rcv_nxt, flags::FIN, self.window());
        self.transmit_control(&fin).await?;
        log::debug!("[conn] → FIN seq={}", fin.header.seq);

        let mut timer = RetransmitTimer::new(self.config.timeout);
        loop {
            match self.recv_from_peer(timer.deadline()).await? {
                Some(pkt) if pkt.header.has(flags::ACK | flags::FIN) => break,
                Some(_) => {}
                None => {
                    let resends = timer.on_expired();
                    if let Some(max) = self.config.max_retries {
                        if resends > max {
                            log::warn!("[conn] FIN not acknowledged after {max} resends");
                            self.abort().await;
                            return Err(ConnError::MaxRetriesExceeded(max));
                        }
                    }
                    self.emit(TransferEvent::FinResent);
                    self.transmit_control(&fin).await?;
                }
            }
        }

        self.next_seq = self.next_seq.wrapping_add(1);
        log::info!("[conn] connection closed");
        self.finish_transfer();
        Ok(())
    }

    /// Answer a FIN with FIN-ACK.
    pub(crate) async fn send_fin_ack(&mut self) -> Result<(), ConnError> {
        let fin_ack = Packet::control(
            self.next_seq,
            self.rcv_nxt,
            flags::ACK | flags::FIN,
            self.window(),
        );
        self.transmit_control(&fin_ack).await
    }

    /// Stay reachable after FIN-ACK so a peer whose FIN-ACK was lost gets
    /// another one.
    ///
    /// The wait is `(loss budget + 2)` timeouts: every resent FIN may itself
    /// be dropped until the peer's budget runs out.  Each duplicate FIN
    /// restarts the wait.
    pub(crate) async fn linger(&mut self) -> Result<(), ConnError> {
        self.state = ConnectionState::Closing;
        let budget = self
            .config
            .max_simulated_losses
            .max(self.injector.max_losses());
        let mut timer =
            RetransmitTimer::new(self.config.timeout.saturating_mul(budget.saturating_add(2)));
        loop {
            match self.recv_from_peer(timer.deadline()).await? {
                None => return Ok(()),
                Some(pkt) if pkt.header.is_fin() => {
                    self.emit(TransferEvent::FinAckResent);
                    self.send_fin_ack().await?;
                    timer.restart();
                }
                Some(_) => {}
            }
        }
    }

    /// Give up on the transfer: best-effort RST, then close.
    pub(crate) async fn abort(&mut self) {
        if let (Some(socket), Some(peer)) = (self.socket.as_ref(), self.peer) {
            let rst = Packet::control(self.next_seq, self.rcv_nxt, flags::RST, self.window());
            if let Err(e) = socket.send_to(&rst, peer).await {
                log::debug!("[conn] could not send RST: {e}");
            }
        }
        self.finish_transfer();
    }

    /// Close the socket and reset per-transfer state.
    pub(crate) fn finish_transfer(&mut self) {
        if self.simulated_losses() > 0 {
            log::info!("[conn] simulated losses this transfer: {}", self.simulated_losses());
        }
        self.socket = None;
        self.peer = None;
        self.pending = None;
        self.injector.reset();
        self.state = ConnectionState::Closed;
    }

    // -----------------------------------------------------------------------
    // I/O helpers
    // -----------------------------------------------------------------------

    pub(crate) fn socket(&self) -> Result<&Socket, ConnError> {
        self.socket.as_ref().ok_or(ConnError::SocketClosed)
    }

    pub(crate) fn connected_peer(&self) -> Result<SocketAddr, ConnError> {
        self.peer.ok_or(ConnError::NotConnected)
    }

    pub(crate) fn window(&self) -> u16 {
        self.config.advertised_window()
    }

    pub(crate) fn require_established(&self) -> Result<(), ConnError> {
        if self.state.is_established() {
            Ok(())
        } else {
            Err(ConnError::BadState(self.state))
        }
    }

    /// Wait until `deadline` for a packet from the connected peer.
    ///
    /// Datagrams from other addresses are ignored.  `Ok(None)` means the
    /// deadline passed.
    pub(crate) async fn recv_from_peer(
        &self,
        deadline: Instant,
    ) -> Result<Option<Packet>, ConnError> {
        let socket = self.socket()?;
        let peer = self.connected_peer()?;
        loop {
            match socket.recv_until(deadline).await? {
                RecvEvent::Timeout => return Ok(None),
                RecvEvent::Packet { packet, from } if from == peer => return Ok(Some(packet)),
                RecvEvent::Packet { from, .. } => {
                    log::debug!("[conn] ignoring datagram from unknown peer {from}");
                }
            }
        }
    }

    /// Handshake packets bypass the fault injector.
    async fn send_handshake(&self, packet: &Packet) -> Result<(), ConnError> {
        let peer = self.connected_peer()?;
        self.socket()?.send_to(packet, peer).await?;
        Ok(())
    }

    /// Send a data packet unless the fault injector swallows it.
    pub(crate) async fn transmit_data(&mut self, out: &Outgoing) -> Result<(), ConnError> {
        let len = out.packet.payload.len();
        if self.injector.should_drop() {
            self.emit(TransferEvent::Lost {
                offset: out.offset,
                len,
            });
            return Ok(());
        }

        let peer = self.connected_peer()?;
        self.socket()?.send_to(&out.packet, peer).await?;
        self.emit(if out.retransmission {
            TransferEvent::Retransmitted {
                offset: out.offset,
                len,
            }
        } else {
            TransferEvent::Sent {
                offset: out.offset,
                len,
            }
        });
        Ok(())
    }

    /// Send an ACK, FIN or FIN-ACK unless the fault injector swallows it.
    pub(crate) async fn transmit_control(&mut self, packet: &Packet) -> Result<(), ConnError> {
        if self.injector.should_drop() {
            self.emit(TransferEvent::AckLost {
                ack: packet.header.ack,
            });
            return Ok(());
        }
        let peer = self.connected_peer()?;
        self.socket()?.send_to(packet, peer).await?;
        Ok(())
    }

    /// Record, log and forward one event.
    pub(crate) fn emit(&mut self, event: TransferEvent) {
        self.stats.record(&event);
        let level = match event {
            TransferEvent::FinResent => Level::Warn,
            _ if self.config.verbose => Level::Info,
            _ => Level::Debug,
        };
        log::log!(level, "[conn] {event}");
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .field("peer", &self.peer)
            .field("next_seq", &self.next_seq)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("injector", &self.injector)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
