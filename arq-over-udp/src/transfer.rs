//! Reliable data transfer over an established [`Connection`].
//!
//! ```text
//!   send_reliable                               receive_reliable
//!  ┌──────────────┐   DATA (seq, payload)      ┌──────────────────┐
//!  │ SenderEngine │──────────────────────────▶ │     Receiver     │
//!  │  SAW/GBN/SR  │                            │ (shared by all)  │
//!  │              │ ◀──────────────────────────│                  │
//!  └──────┬───────┘   ACK (ack_num)            └────────┬─────────┘
//!         │ all acked                                   │
//!         ▼                                             ▼
//!     close(): FIN  ─────────────────────────▶  FIN-ACK, then linger
//! ```
//!
//! Both loops are single-task: every wait is a `recv_until` against one
//! deadline, so the timer can never race the socket.
//!
//! # Timer discipline
//!
//! The sender keeps one retransmission deadline.  It restarts whenever the
//! oldest unacknowledged offset changes and after every timeout
//! retransmission.  `config.max_retries` caps the number of consecutive
//! expiries without progress; the receiver applies the same ceiling to
//! consecutive idle intervals.

use crate::connection::{ConnError, Connection};
use crate::events::{TransferEvent, TransferStats};
use crate::packet::{flags, Packet};
use crate::protocol::Protocol;
use crate::receiver::{Receiver, SegmentOutcome};
use crate::sender::{ArqSender, Framer, SenderEngine};
use crate::timer::RetransmitTimer;

impl Connection {
    /// Deliver `data` to the peer with `protocol`, then tear the connection
    /// down.
    ///
    /// Returns the counters of the transfer.  Data is cut into packets of at
    /// most `config.max_payload_size` bytes; empty data goes straight to
    /// teardown.
    pub async fn send_reliable(
        &mut self,
        data: &[u8],
        protocol: Protocol,
    ) -> Result<TransferStats, ConnError> {
        self.require_established()?;
        if data.len() >= u32::MAX as usize {
            return Err(ConnError::PayloadTooLarge(data.len()));
        }
        self.stats = TransferStats::default();

        let framer = Framer::new(self.next_seq, self.rcv_nxt, self.window());
        let mut engine = SenderEngine::new(
            protocol,
            data.to_vec(),
            self.config().max_payload_size,
            self.config().window_size,
            framer,
        );
        log::info!("[{}] sending {} bytes", protocol.short_name(), data.len());

        for out in engine.open() {
            self.transmit_data(&out).await?;
        }

        let max_retries = self.config().max_retries;
        let mut timer = RetransmitTimer::new(self.config().timeout);
        let mut head = engine.oldest_unacked();

        while !engine.is_complete() {
            match self.recv_from_peer(timer.deadline()).await? {
                Some(pkt) => {
                    let h = pkt.header;
                    if h.is_rst() {
                        log::warn!("[{}] ← RST; aborting", protocol.short_name());
                        self.finish_transfer();
                        return Err(ConnError::Reset);
                    }
                    // Only plain ACKs drive the window; stray handshake or
                    // teardown packets are ignored.
                    if !h.is_ack() || h.is_syn() || h.is_fin() {
                        continue;
                    }

                    let outcome = engine.on_ack(h.ack);
                    if outcome.is_noop() {
                        log::trace!("[{}] ← ACK ack={} (no change)", protocol.short_name(), h.ack);
                        continue;
                    }
                    for (offset, len) in outcome.acknowledged {
                        self.emit(TransferEvent::Acknowledged { offset, len });
                    }
                    for out in &outcome.transmit {
                        self.transmit_data(out).await?;
                    }

                    let now_head = engine.oldest_unacked();
                    if now_head != head {
                        head = now_head;
                        timer.restart();
                    }
                }
                None => {
                    let expiries = timer.on_expired();
                    if let Some(max) = max_retries {
                        if expiries > max {
                            log::warn!(
                                "[{}] no progress after {max} retransmissions; giving up",
                                protocol.short_name()
                            );
                            self.abort().await;
                            return Err(ConnError::MaxRetriesExceeded(max));
                        }
                    }

                    let resend = engine.on_timeout();
                    log::debug!(
                        "[{}] timeout; retransmitting {} packet(s)",
                        protocol.short_name(),
                        resend.len()
                    );
                    for out in &resend {
                        self.transmit_data(out).await?;
                    }
                }
            }
        }

        self.next_seq = self.next_seq.wrapping_add(data.len() as u32);
        log::info!(
            "[{}] all {} bytes acknowledged ({} retransmissions)",
            protocol.short_name(),
            data.len(),
            self.stats.retransmissions
        );
        self.close().await?;
        Ok(self.stats)
    }

    /// Receive one transfer sent with `protocol` and return its bytes.
    ///
    /// Runs until the peer's FIN, answers it with FIN-ACK and lingers long
    /// enough to answer resent FINs before closing.  Waits without bound for data unless
    /// `config.max_retries` is set.
    pub async fn receive_reliable(&mut self, protocol: Protocol) -> Result<Vec<u8>, ConnError> {
        self.require_established()?;
        self.stats = TransferStats::default();

        let max_retries = self.config().max_retries;
        let window = self
            .config()
            .window_size
            .saturating_mul(self.config().max_payload_size);
        let window = u32::try_from(window).unwrap_or(u32::MAX);
        let mut receiver = Receiver::new(protocol, self.rcv_nxt, window);
        let mut idle = RetransmitTimer::new(self.config().timeout);
        let mut queued = self.pending.take();
        log::info!("[{}] receiving", protocol.short_name());

        loop {
            let pkt = match queued.take() {
                Some(pkt) => pkt,
                None => match self.recv_from_peer(idle.deadline()).await? {
                    Some(pkt) => pkt,
                    None => {
                        let idle_intervals = idle.on_expired();
                        if let Some(max) = max_retries {
                            if idle_intervals > max {
                                log::warn!(
                                    "[{}] peer silent for {max} timeouts; giving up",
                                    protocol.short_name()
                                );
                                self.abort().await;
                                return Err(ConnError::MaxRetriesExceeded(max));
                            }
                        }
                        continue;
                    }
                },
            };
            idle.restart();

            let h = pkt.header;
            if h.is_rst() {
                log::warn!("[{}] ← RST; aborting", protocol.short_name());
                self.finish_transfer();
                return Err(ConnError::Reset);
            }
            if h.is_fin() {
                self.rcv_nxt = h.seq.wrapping_add(1);
                log::debug!("[{}] ← FIN seq={}; → FIN-ACK", protocol.short_name(), h.seq);
                self.send_fin_ack().await?;
                break;
            }
            if h.is_syn() || pkt.payload.is_empty() {
                continue;
            }

            let outcome = receiver.on_segment(h.seq, &pkt.payload);
            self.emit(match outcome {
                SegmentOutcome::Delivered { offset, len, .. } => {
                    TransferEvent::Delivered { offset, len }
                }
                SegmentOutcome::Buffered { offset, len, .. } => {
                    TransferEvent::Buffered { offset, len }
                }
                SegmentOutcome::Duplicate { offset, .. } => TransferEvent::Duplicate { offset },
                SegmentOutcome::Discarded { offset } => TransferEvent::Discarded { offset },
            });

            if let Some(ack_num) = outcome.ack_num() {
                let ack = Packet::control(self.next_seq, ack_num, flags::ACK, self.window());
                self.transmit_control(&ack).await?;
            }
        }

        self.linger().await?;
        let data = receiver.finish();
        log::info!(
            "[{}] received {} bytes ({} duplicates)",
            protocol.short_name(),
            data.len(),
            self.stats.duplicates
        );
        self.finish_transfer();
        Ok(data)
    }
}
