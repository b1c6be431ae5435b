//! Send-side state for one transfer.
//!
//! [`Sender`] owns the send pointer, the congestion window and the
//! send-time ledger.  It does **not** touch the channel;
//! [`crate::connection::Connection`] calls these methods and owns the
//! actual send/receive loop.
//!
//! # Offset layout
//!
//! ```text
//!        acked              next                len
//!          │                  │                  │
//!  ────────┼──────────────────┼──────────────────┼──▶ byte offsets
//!          │ <── in flight ──▶│ <── unsent ─────▶│
//! ```
//!
//! Segments cover `[k·seg, min((k+1)·seg, len))` and are named by their end
//! offset (the "marker" carried in the sequence field).  Rewinding after a
//! loss signal moves `next` back to `acked`; the segments beyond it are
//! sent again under the same markers.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::congestion::{AckEvent, CongestionController};
use crate::error::{Error, Result};
use crate::packet::{Header, Packet};
use crate::state::SenderState;

// ---------------------------------------------------------------------------
// SendLedger
// ---------------------------------------------------------------------------

/// Transmission times keyed by marker, ordered by marker.
///
/// Holds at most the acknowledged marker plus one entry per in-flight
/// segment: entries below the acknowledged offset are released as acks
/// arrive and entries beyond it are forgotten on a rewind.  The
/// acknowledged marker itself stays so duplicate acks still yield samples.
#[derive(Debug, Default)]
struct SendLedger {
    entries: VecDeque<(u32, Instant)>,
}

impl SendLedger {
    fn record(&mut self, marker: u32, at: Instant) {
        while self.entries.back().is_some_and(|&(m, _)| m >= marker) {
            self.entries.pop_back();
        }
        self.entries.push_back((marker, at));
    }

    fn sent_at(&self, marker: u32) -> Option<Instant> {
        self.entries
            .binary_search_by_key(&marker, |&(m, _)| m)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Oldest transmission still awaiting acknowledgement.
    fn oldest_after(&self, acked: u32) -> Option<Instant> {
        self.entries
            .iter()
            .find(|&&(m, _)| m > acked)
            .map(|&(_, at)| at)
    }

    fn release_below(&mut self, acked: u32) {
        while self.entries.front().is_some_and(|&(m, _)| m < acked) {
            self.entries.pop_front();
        }
    }

    fn forget_after(&mut self, acked: u32) {
        while self.entries.back().is_some_and(|&(m, _)| m > acked) {
            self.entries.pop_back();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    /// Payload length of the transfer.
    pub bytes: u32,
    pub syn_attempts: u32,
    /// Data packets put on the wire, retransmissions included.
    pub segments_sent: u32,
    pub retransmitted_segments: u32,
    pub timeouts: u32,
    pub fast_retransmits: u32,
}

/// Result of feeding one acknowledgement to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acked {
    pub event: AckEvent,
    /// Round-trip sample for the estimator, if the marker was on record.
    pub rtt: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Sender<'a> {
    payload: &'a [u8],
    len: u32,
    segment_size: u32,
    /// Next byte offset to transmit.
    next: u32,
    /// Highest marker ever transmitted; anything at or below is a resend.
    highest_sent: u32,
    congestion: CongestionController,
    ledger: SendLedger,
    last_sent_at: Option<Instant>,
    /// Minimum spacing between transmissions, set by the last timeout.
    send_interval: Duration,
    cooldown_divisor: f64,
    consecutive_timeouts: u32,
    state: SenderState,
    stats: SendStats,
}

impl<'a> Sender<'a> {
    pub fn new(payload: &'a [u8], config: &Config) -> Result<Self> {
        let len = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;
        let segment_size = u32::try_from(config.segment_size()).unwrap_or(u32::MAX);
        Ok(Self {
            payload,
            len,
            segment_size,
            next: 0,
            highest_sent: 0,
            congestion: CongestionController::new(config),
            ledger: SendLedger::default(),
            last_sent_at: None,
            send_interval: Duration::ZERO,
            cooldown_divisor: config.cooldown_divisor,
            consecutive_timeouts: 0,
            state: SenderState::Handshaking,
            stats: SendStats {
                bytes: len,
                ..SendStats::default()
            },
        })
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Note a syn transmission; its time is what the response is measured against.
    pub fn record_syn(&mut self, now: Instant) {
        self.ledger.record(0, now);
        self.last_sent_at = Some(now);
        self.stats.syn_attempts += 1;
    }

    /// Accept the handshake response and return its round-trip sample.
    ///
    /// The response repeats the zero offset, so the controller counts it as
    /// the first duplicate acknowledgement.
    pub fn on_handshake(&mut self, response: &Header, now: Instant) -> Option<Duration> {
        self.state = SenderState::Transmitting;
        if response.ack == self.acked() {
            self.congestion.on_ack(response.ack);
        } else {
            log::warn!(
                "[sender] handshake response carries ack={}, expected {}",
                response.ack,
                self.acked()
            );
        }
        self.ledger
            .sent_at(0)
            .map(|at| now.saturating_duration_since(at))
    }

    // -----------------------------------------------------------------------
    // Transmission
    // -----------------------------------------------------------------------

    /// `true` when pacing, window and remaining data all allow a send.
    pub fn can_transmit(&self, now: Instant) -> bool {
        self.next < self.len && self.window_open() && self.pacing_elapsed(now)
    }

    fn window_open(&self) -> bool {
        let window_bytes = u64::from(self.congestion.window()) * u64::from(self.segment_size);
        u64::from(self.in_flight()) < window_bytes
    }

    fn pacing_elapsed(&self, now: Instant) -> bool {
        self.last_sent_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.send_interval)
    }

    /// Build the next segment if one may go out now, advancing the pointer.
    pub fn next_segment(&mut self, now: Instant) -> Option<Packet> {
        if !self.can_transmit(now) {
            return None;
        }

        let start = self.next;
        let end = start.saturating_add(self.segment_size).min(self.len);
        let fin = end == self.len;
        let packet = Packet::data(end, self.payload[start as usize..end as usize].to_vec(), fin);

        if end <= self.highest_sent {
            self.stats.retransmitted_segments += 1;
        }
        self.highest_sent = self.highest_sent.max(end);
        self.ledger.record(end, now);
        self.last_sent_at = Some(now);
        self.next = end;
        self.stats.segments_sent += 1;
        Some(packet)
    }

    // -----------------------------------------------------------------------
    // Acknowledgements
    // -----------------------------------------------------------------------

    /// Process one cumulative acknowledgement from the receiver.
    pub fn on_ack(&mut self, header: &Header, now: Instant) -> Acked {
        let ack = header.ack;
        if ack > self.len {
            log::warn!("[sender] ignoring ack={ack} beyond payload length {}", self.len);
            return Acked {
                event: AckEvent::Stale,
                rtt: None,
            };
        }

        let rtt = self
            .ledger
            .sent_at(ack)
            .map(|at| now.saturating_duration_since(at));

        let event = self.congestion.on_ack(ack);
        match event {
            AckEvent::Advanced { .. } => {
                self.ledger.release_below(ack);
                // A late ack for data sent before a rewind.
                if self.next < ack {
                    self.next = ack;
                }
                self.consecutive_timeouts = 0;
            }
            AckEvent::FastRetransmit => {
                log::debug!(
                    "[sender] duplicate acks at {ack}: fast retransmit, cwnd={}",
                    self.congestion.window()
                );
                self.stats.fast_retransmits += 1;
                self.rewind();
            }
            AckEvent::Duplicate { .. } | AckEvent::Stale => {}
        }

        if self.is_complete() {
            self.state = SenderState::Closed;
        }
        Acked { event, rtt }
    }

    /// Detect a retransmission timeout on the oldest in-flight segment.
    ///
    /// On expiry: rewind to the acknowledged offset, collapse the window and
    /// space further sends by `rto / cooldown_divisor`.
    pub fn check_timeout(&mut self, now: Instant, rto: Duration) -> bool {
        let Some(sent_at) = self.ledger.oldest_after(self.acked()) else {
            return false;
        };
        if now.saturating_duration_since(sent_at) < rto {
            return false;
        }

        self.rewind();
        self.congestion.on_timeout();
        self.send_interval = rto.div_f64(self.cooldown_divisor);
        self.consecutive_timeouts += 1;
        self.stats.timeouts += 1;
        log::debug!(
            "[sender] timeout after {rto:?}: resend from {}, ssthresh={} interval={:?}",
            self.next,
            self.congestion.ssthresh(),
            self.send_interval
        );
        true
    }

    fn rewind(&mut self) {
        self.next = self.acked();
        self.ledger.forget_after(self.next);
    }

    /// Earliest instant at which a timeout or a paced send becomes due.
    pub fn next_deadline(&self, rto: Duration) -> Option<Instant> {
        let expiry = self.ledger.oldest_after(self.acked()).map(|at| at + rto);
        let paced = if self.next < self.len && self.window_open() {
            self.last_sent_at.map(|at| at + self.send_interval)
        } else {
            None
        };
        match (expiry, paced) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn is_complete(&self) -> bool {
        self.acked() >= self.len
    }

    pub fn acked(&self) -> u32 {
        self.congestion.acked()
    }

    pub fn next_offset(&self) -> u32 {
        self.next
    }

    /// Bytes sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.next.saturating_sub(self.acked())
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }

    pub fn note_empty_fin(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
        self.stats.segments_sent += 1;
    }

    pub fn finish(&mut self) {
        self.state = SenderState::Closed;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::HEADER_LEN;

    const SEG: usize = 100;

    fn config() -> Config {
        Config {
            max_packet: HEADER_LEN + SEG,
            ..Config::default()
        }
    }

    fn ack(offset: u32) -> Header {
        Packet::ack(offset).header
    }

    /// Sender past the handshake with the given window.
    fn sender(payload: &[u8], cwnd: u32) -> (Sender<'_>, Instant) {
        let config = Config {
            initial_window: cwnd,
            ..config()
        };
        let mut s = Sender::new(payload, &config).unwrap();
        let now = Instant::now();
        s.record_syn(now);
        s.on_handshake(&ack(0), now);
        (s, now)
    }

    fn send_all(s: &mut Sender<'_>, now: Instant) -> Vec<Packet> {
        std::iter::from_fn(|| s.next_segment(now)).collect()
    }

    #[test]
    fn initial_state() {
        let payload = [0u8; 250];
        let s = Sender::new(&payload, &config()).unwrap();
        assert_eq!(s.state(), SenderState::Handshaking);
        assert_eq!(s.next_offset(), 0);
        assert_eq!(s.acked(), 0);
        assert!(!s.is_complete());
    }

    #[test]
    fn handshake_sample_measures_syn() {
        let payload = [0u8; 10];
        let mut s = Sender::new(&payload, &config()).unwrap();
        let t0 = Instant::now();
        s.record_syn(t0);
        let rtt = s.on_handshake(&ack(0), t0 + Duration::from_millis(40));
        assert_eq!(rtt, Some(Duration::from_millis(40)));
        assert_eq!(s.state(), SenderState::Transmitting);
        assert_eq!(s.congestion().duplicate_acks(), 1);
    }

    #[test]
    fn handshake_response_is_first_duplicate() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        assert_eq!(s.next_offset(), 400);

        assert_eq!(s.on_ack(&ack(0), now).event, AckEvent::Duplicate { count: 2 });
        let third = s.on_ack(&ack(0), now);
        assert_eq!(third.event, AckEvent::FastRetransmit);
        assert_eq!(s.next_offset(), 0);
        assert_eq!(s.congestion().window(), 2);
        assert_eq!(s.next_segment(now).unwrap().header.seq, 100);
    }

    #[test]
    fn mismatched_handshake_ack_is_not_counted() {
        let payload = [0u8; 10];
        let mut s = Sender::new(&payload, &config()).unwrap();
        let t0 = Instant::now();
        s.record_syn(t0);
        s.on_handshake(&ack(7), t0);
        assert_eq!(s.congestion().duplicate_acks(), 0);
        assert_eq!(s.acked(), 0);
    }

    #[test]
    fn segments_are_named_by_end_offset() {
        let payload: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let (mut s, now) = sender(&payload, 8);
        let segments = send_all(&mut s, now);

        let markers: Vec<u32> = segments.iter().map(|p| p.header.seq).collect();
        assert_eq!(markers, vec![100, 200, 250]);
        assert_eq!(segments[2].payload, &payload[200..]);
        assert!(segments[2].header.is_fin());
        assert!(!segments[1].header.is_fin());
        assert!(segments.iter().all(|p| p.header.ack == 0));
    }

    #[test]
    fn window_limits_in_flight_bytes() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 2);
        assert_eq!(send_all(&mut s, now).len(), 2);
        assert_eq!(s.in_flight(), 200);
        assert!(!s.can_transmit(now));
    }

    #[test]
    fn forward_ack_opens_window() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 1);
        s.next_segment(now).unwrap();
        let later = now + Duration::from_millis(5);
        let acked = s.on_ack(&ack(100), later);
        assert_eq!(acked.event, AckEvent::Advanced { newly_acked: 100 });
        assert_eq!(acked.rtt, Some(Duration::from_millis(5)));
        assert_eq!(s.congestion().window(), 2);
        assert_eq!(send_all(&mut s, later).len(), 2);
    }

    #[test]
    fn third_duplicate_rewinds_to_acked_offset() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        assert_eq!(s.next_offset(), 400);

        s.on_ack(&ack(100), now); // cwnd 8, window reopens
        send_all(&mut s, now);
        let next_before = s.next_offset();
        let window = s.congestion().window();

        s.on_ack(&ack(100), now);
        s.on_ack(&ack(100), now);
        assert_eq!(s.next_offset(), next_before, "two duplicates must not rewind");

        let third = s.on_ack(&ack(100), now);
        assert_eq!(third.event, AckEvent::FastRetransmit);
        assert_eq!(s.next_offset(), 100);
        assert_eq!(s.congestion().window(), window / 2);

        // The resend reuses the original marker.
        let resent = s.next_segment(now).unwrap();
        assert_eq!(resent.header.seq, 200);
        assert_eq!(s.stats().retransmitted_segments, 1);
    }

    #[test]
    fn timeout_collapses_window_and_paces() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        let rto = Duration::from_millis(2300);

        assert!(!s.check_timeout(now + Duration::from_millis(2299), rto));
        assert!(s.check_timeout(now + rto, rto));
        assert_eq!(s.congestion().window(), 1);
        assert_eq!(s.congestion().ssthresh(), 16);
        assert_eq!(s.next_offset(), 0);
        assert_eq!(s.send_interval(), Duration::from_secs(1));
        assert_eq!(s.consecutive_timeouts(), 1);

        // Nothing in flight after the rewind, so no second timeout.
        assert!(!s.check_timeout(now + rto * 4, rto));
    }

    #[test]
    fn cooldown_spaces_sends() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        let rto = Duration::from_millis(2300);
        let t = now + rto;
        s.check_timeout(t, rto);

        // Last send was at `now`, so the cooldown has already passed.
        assert!(s.next_segment(t).is_some());
        s.on_ack(&ack(100), t);
        assert!(s.next_segment(t + Duration::from_millis(500)).is_none());
        assert!(s.next_segment(t + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn late_ack_pulls_pointer_forward() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        let rto = Duration::from_millis(10);
        s.check_timeout(now + rto, rto);
        assert_eq!(s.next_offset(), 0);

        s.on_ack(&ack(300), now + rto);
        assert_eq!(s.next_offset(), 300);
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.consecutive_timeouts(), 0);
    }

    #[test]
    fn ack_beyond_payload_is_ignored() {
        let payload = [0u8; 100];
        let (mut s, now) = sender(&payload, 1);
        s.next_segment(now);
        let acked = s.on_ack(&ack(5000), now);
        assert_eq!(acked.event, AckEvent::Stale);
        assert_eq!(s.acked(), 0);
    }

    #[test]
    fn final_ack_completes_transfer() {
        let payload = [0u8; 150];
        let (mut s, now) = sender(&payload, 4);
        send_all(&mut s, now);
        s.on_ack(&ack(150), now);
        assert!(s.is_complete());
        assert_eq!(s.state(), SenderState::Closed);
        assert!(s.next_deadline(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn deadline_is_oldest_in_flight_expiry() {
        let payload = [0u8; 1000];
        let (mut s, now) = sender(&payload, 1);
        s.next_segment(now);
        let rto = Duration::from_millis(50);
        assert_eq!(s.next_deadline(rto), Some(now + rto));
    }

    #[test]
    fn ledger_stays_bounded_by_window() {
        let payload = vec![0u8; 100 * SEG];
        let (mut s, mut now) = sender(&payload, 2);
        for _ in 0..40 {
            send_all(&mut s, now);
            now += Duration::from_millis(1);
            let acked = s.next_offset();
            s.on_ack(&ack(acked), now);
        }
        assert!(s.ledger.len() <= s.congestion().window() as usize + 1);
    }
}
