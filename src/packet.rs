//! Packet codec.
//!
//! A datagram is a fixed 16-byte header followed by zero or more payload
//! bytes.  Encoding and decoding are pure; nothing here touches a channel.
//!
//! ```text
//!  byte   0       4       8   9   10              16
//!         ├───────┼───────┼───┼───┼───────────────┼──────────
//!         │  seq  │  ack  │ F │ W │  reserved (0) │ payload…
//!         └───────┴───────┴───┴───┴───────────────┴──────────
//!
//!  seq, ack : u32 big-endian
//!  F        : flags, bit0 = SYN, bit1 = ACK, bit2 = FIN
//!  W        : advertised window, carried but not acted upon
//! ```
//!
//! A data packet's `seq` is the byte offset just past its payload, so a
//! segment covering `[1000, 2000)` travels as `seq = 2000`.  The receiver
//! answers with `ack` = bytes delivered in order so far.  A datagram of
//! exactly [`HEADER_LEN`] bytes has no payload.

use thiserror::Error;

pub mod flags {
    pub const SYN: u8 = 0b0000_0001;
    pub const ACK: u8 = 0b0000_0010;
    /// Set on the segment that ends the stream.
    pub const FIN: u8 = 0b0000_0100;
}

pub const HEADER_LEN: usize = 16;

const SEQ: usize = 0;
const ACK: usize = 4;
const FLAGS: usize = 8;
const WINDOW: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// End offset of the carried payload; 0 on control packets.
    pub seq: u32,
    /// Cumulative in-order bytes received by whoever sent this packet.
    pub ack: u32,
    pub flags: u8,
    pub window: u8,
}

impl Header {
    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    fn control(header: Header) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    /// Connection request from the transmitting side.
    pub fn syn() -> Self {
        Self::control(Header {
            flags: flags::SYN,
            ..Header::default()
        })
    }

    /// Cumulative acknowledgement of `received` bytes.
    pub fn ack(received: u32) -> Self {
        Self::control(Header {
            ack: received,
            flags: flags::ACK,
            ..Header::default()
        })
    }

    /// Data segment ending at byte offset `end`.
    pub fn data(end: u32, payload: Vec<u8>, fin: bool) -> Self {
        let bits = if fin { flags::FIN } else { 0 };
        Self {
            header: Header {
                seq: end,
                flags: bits,
                ..Header::default()
            },
            payload,
        }
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.seq.to_be_bytes());
        out.extend_from_slice(&self.header.ack.to_be_bytes());
        out.push(self.header.flags);
        out.push(self.header.window);
        out.resize(HEADER_LEN, 0);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a received datagram.  Anything past the header is payload.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                len: datagram.len(),
            });
        }
        let (head, payload) = datagram.split_at(HEADER_LEN);
        let word = |at: usize| u32::from_be_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]]);

        Ok(Self {
            header: Header {
                seq: word(SEQ),
                ack: word(ACK),
                flags: head[FLAGS],
                window: head[WINDOW],
            },
            payload: payload.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram of {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    TooShort { len: usize },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn data_segment_survives_the_wire() {
        let sent = Packet::data(2000, b"hello".to_vec(), true);
        let got = Packet::decode(&sent.encode()).unwrap();
        assert_eq!(got, sent);
        assert!(got.header.is_fin());
        assert!(!got.header.is_syn());
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one_byte(1)]
    #[case::header_minus_one(HEADER_LEN - 1)]
    fn short_datagrams_are_malformed(#[case] len: usize) {
        assert_eq!(
            Packet::decode(&vec![0u8; len]),
            Err(PacketError::TooShort { len })
        );
    }

    #[test]
    fn bare_header_has_no_payload() {
        let got = Packet::decode(&[0u8; HEADER_LEN]).unwrap();
        assert!(!got.has_payload());
        assert_eq!(got.header, Header::default());
    }

    #[test]
    fn bytes_after_header_are_payload() {
        let mut wire = Packet::ack(7).encode();
        wire.extend_from_slice(b"xyz");
        let got = Packet::decode(&wire).unwrap();
        assert_eq!(got.payload, b"xyz");
        assert_eq!(got.header.ack, 7);
        assert!(got.header.is_ack());
    }

    #[rstest]
    #[case::syn(Packet::syn(), 0b001)]
    #[case::ack(Packet::ack(0), 0b010)]
    #[case::fin(Packet::data(1, vec![1], true), 0b100)]
    #[case::plain_data(Packet::data(1, vec![1], false), 0)]
    fn flag_bits(#[case] packet: Packet, #[case] bits: u8) {
        assert_eq!(packet.encode()[FLAGS], bits);
    }

    #[test]
    fn layout_is_big_endian_with_zeroed_tail() {
        let mut pkt = Packet::data(0x0102_0304, b"zz".to_vec(), false);
        pkt.header.ack = 0x0506_0708;
        pkt.header.window = 9;
        let wire = pkt.encode();
        assert_eq!(wire.len(), HEADER_LEN + 2);
        assert_eq!(wire[SEQ..SEQ + 4], [1, 2, 3, 4]);
        assert_eq!(wire[ACK..ACK + 4], [5, 6, 7, 8]);
        assert_eq!(wire[WINDOW], 9);
        assert_eq!(wire[WINDOW + 1..HEADER_LEN], [0; 6]);
    }
}
