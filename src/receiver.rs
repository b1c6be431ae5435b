//! Receive-side state for one transfer.
//!
//! The receiver keeps a single cumulative offset: bytes are only ever
//! written in order, each byte exactly once.  A data packet `(seq, payload)`
//! covers `[seq - payload.len(), seq)`; only the part beyond the delivered
//! offset is handed out, so duplicates and overlapping retransmissions are
//! harmless.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::packet::{flags, Packet};
use crate::state::ReceiverState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Bytes written to the sink.
    pub delivered: u32,
    pub packets_received: u32,
    /// Data packets whose bytes had all been delivered already.
    pub duplicates: u32,
    /// Data packets too far ahead of the delivered offset to accept.
    pub dropped_out_of_window: u32,
    pub acks_sent: u32,
}

/// What to do with one arriving packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery<'p> {
    /// New in-order bytes for the sink.
    Deliver(&'p [u8]),
    /// Everything in the packet was delivered before.
    Duplicate,
    /// Leaves a gap behind the delivered offset; the cumulative ack asks
    /// for a resend instead.
    OutOfWindow,
    /// No payload (syn, empty fin, stray ack).
    Control,
}

#[derive(Debug)]
pub struct Receiver {
    segment_size: u32,
    delivered: u32,
    fin_observed: bool,
    last_ack_sent_at: Option<Instant>,
    state: ReceiverState,
    stats: ReceiveStats,
}

impl Receiver {
    pub fn new(config: &Config) -> Self {
        Self {
            segment_size: u32::try_from(config.segment_size()).unwrap_or(u32::MAX),
            delivered: 0,
            fin_observed: false,
            last_ack_sent_at: None,
            state: ReceiverState::AwaitingSyn,
            stats: ReceiveStats::default(),
        }
    }

    /// The peer's syn arrived; start accepting data.
    pub fn on_syn(&mut self) {
        if self.state == ReceiverState::AwaitingSyn {
            self.transition(ReceiverState::Receiving);
        }
    }

    /// The drain is over.
    pub fn close(&mut self) {
        self.transition(ReceiverState::Closed);
    }

    fn transition(&mut self, to: ReceiverState) {
        log::info!("[receiver] {} → {to}", self.state);
        self.state = to;
    }

    /// Classify `packet` and advance the delivered offset.
    ///
    /// The fin is recorded once every byte up to it has been delivered,
    /// which moves a receiving end into draining.
    pub fn on_packet<'p>(&mut self, packet: &'p Packet) -> Delivery<'p> {
        self.stats.packets_received += 1;
        let seq = packet.header.seq;

        let delivery = if !packet.has_payload() {
            Delivery::Control
        } else if u64::from(seq) > u64::from(self.delivered) + u64::from(self.segment_size) {
            self.stats.dropped_out_of_window += 1;
            Delivery::OutOfWindow
        } else if seq > self.delivered {
            self.accept(seq, &packet.payload)
        } else {
            self.stats.duplicates += 1;
            Delivery::Duplicate
        };

        if packet.header.is_fin() && seq == self.delivered {
            self.fin_observed = true;
            if self.state == ReceiverState::Receiving {
                self.transition(ReceiverState::Draining);
            }
        }
        delivery
    }

    fn accept<'p>(&mut self, seq: u32, payload: &'p [u8]) -> Delivery<'p> {
        let start = u32::try_from(payload.len())
            .ok()
            .and_then(|len| seq.checked_sub(len));
        match start {
            Some(start) if start <= self.delivered => {
                let skip = (self.delivered - start) as usize;
                self.delivered = seq;
                self.stats.delivered = seq;
                Delivery::Deliver(&payload[skip..])
            }
            Some(_) => {
                self.stats.dropped_out_of_window += 1;
                Delivery::OutOfWindow
            }
            None => {
                log::warn!(
                    "[receiver] packet seq={seq} shorter than its {} byte payload",
                    payload.len()
                );
                self.stats.dropped_out_of_window += 1;
                Delivery::OutOfWindow
            }
        }
    }

    /// Time since the last acknowledgement went out.
    pub fn rtt_sample(&self, now: Instant) -> Option<Duration> {
        self.last_ack_sent_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Build the cumulative acknowledgement and note when it was sent.
    ///
    /// Once the fin has been seen the ack carries the fin flag too.
    pub fn ack_packet(&mut self, now: Instant) -> Packet {
        self.last_ack_sent_at = Some(now);
        self.stats.acks_sent += 1;
        let mut ack = Packet::ack(self.delivered);
        if self.fin_observed {
            ack.header.flags |= flags::FIN;
        }
        ack
    }

    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn fin_observed(&self) -> bool {
        self.fin_observed
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> ReceiveStats {
        self.stats
    }
}
