//! Datagram codec.
//!
//! One UDP datagram carries exactly one [`Packet`]: a fixed 12-byte header
//! followed by zero or more payload bytes.  Control packets (SYN, SYN-ACK,
//! the handshake ACK, receiver ACKs, FIN, FIN-ACK, RST) have no payload;
//! data packets carry up to `max_payload_size` bytes and always set ACK.
//!
//! # Layout
//!
//! Integers travel in network byte order.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |S|A|F|R|        unused         |          Window Size          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! seq(4) + ack(4) + flags(2) + window(2)
//!
//! There is no length field: everything after the header is payload.

use thiserror::Error;

/// Bit-flag constants for the 16-bit `flags` header field.
///
/// The four flags live in the most significant nibble; the low 12 bits are
/// always zero on encode and ignored on decode.
pub mod flags {
    /// Opens a connection.
    pub const SYN: u16 = 0b1000_0000_0000_0000;
    /// `ack` carries a meaningful value.
    pub const ACK: u16 = 0b0100_0000_0000_0000;
    /// Sender has no more data.
    pub const FIN: u16 = 0b0010_0000_0000_0000;
    /// Abort the connection.
    pub const RST: u16 = 0b0001_0000_0000_0000;

    /// Every defined flag bit.
    pub const MASK: u16 = SYN | ACK | FIN | RST;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

// Field positions inside the header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_WINDOW: usize = 10;

/// Decoded header fields, in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Wire sequence number of the first payload byte.
    pub seq: u32,
    /// Next wire sequence number wanted from the peer, or the end of one
    /// segment under Selective-Repeat.
    pub ack: u32,
    /// Combination of [`flags`] bits.
    pub flags: u16,
    /// Advertised window in packets.  Informational only.
    pub window: u16,
}

impl Header {
    /// `true` when every bit in `mask` is set.
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    pub fn is_syn(&self) -> bool {
        self.has(flags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.has(flags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.has(flags::FIN)
    }

    pub fn is_rst(&self) -> bool {
        self.has(flags::RST)
    }
}

/// Header plus payload; one per datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet from its parts.
    pub fn new(seq: u32, ack: u32, flags: u16, window: u16, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flags,
                window,
            },
            payload,
        }
    }

    /// Build a payload-less control packet (SYN, ACK, FIN, ...).
    pub fn control(seq: u32, ack: u32, flags: u16, window: u16) -> Self {
        Self::new(seq, ack, flags, window, Vec::new())
    }

    /// Wire bytes for this packet.  Unused flag bits are cleared.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 2]
            .copy_from_slice(&(self.header.flags & flags::MASK).to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Inverse of [`encode`](Self::encode).
    ///
    /// Returns [`PacketError::BufferTooShort`] if `buf` cannot hold a full
    /// header.  Any bytes beyond the header are taken as payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort { len: buf.len() });
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let flag_bits = read_u16(buf, OFF_FLAGS) & flags::MASK;
        let window = read_u16(buf, OFF_WINDOW);

        Ok(Packet::new(
            seq,
            ack,
            flag_bits,
            window,
            buf[HEADER_LEN..].to_vec(),
        ))
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Framing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram of {len} bytes is too short to contain a 12-byte header")]
    BufferTooShort { len: usize },
}
