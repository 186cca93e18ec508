//! `arq-over-udp`: a reliable, ordered byte transfer implemented over UDP
//! with a choice of three ARQ strategies (Stop-and-Wait, Go-Back-N and
//! Selective-Repeat).
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   segments   ┌──────────┐
//!  │ SenderEngine │─────────────▶│ Receiver │
//!  │ SAW/GBN/SR   │              │ (shared) │
//!  └────┬─────────┘              └─────┬────┘
//!       │                              │
//!       │            ACKs              │
//!       │◀─────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │ (state machine, handshake, FIN,   │
//!  │  fault injector, event observer)  │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: 12-byte header wire format
//! - [`socket`]: async UDP socket with deadline receives
//! - [`simulator`]: fault injector for loss experiments
//! - [`state`]: connection state machine types
//! - [`config`]: tunable parameters and validation
//! - [`timer`]: retransmission deadline bookkeeping
//! - [`buffer`]: send and receive buffers keyed by stream offset
//! - [`protocol`]: ARQ strategy selector
//! - [`sender`]: shared sender plumbing and Stop-and-Wait
//! - [`gbn_sender`]: Go-Back-N window state machine
//! - [`sr_sender`]: Selective-Repeat window state machine
//! - [`receiver`]: inbound reassembly for every strategy
//! - [`events`]: transfer events and counters
//! - [`connection`]: per-connection lifecycle
//! - [`transfer`]: `send_reliable` / `receive_reliable` drive loops
//!
//! # Example
//!
//! ```ignore
//! let mut client = Connection::bind("127.0.0.1:0".parse()?, Config::default()).await?;
//! client.connect(server_addr).await?;
//! client.send_reliable(b"hello", Protocol::GoBackN).await?;
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod events;
pub mod gbn_sender;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod sr_sender;
pub mod state;
pub mod timer;
pub mod transfer;

pub use config::Config;
pub use connection::{ConnError, Connection};
pub use events::{TransferEvent, TransferStats};
pub use protocol::Protocol;
