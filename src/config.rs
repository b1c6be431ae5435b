//! Tunable protocol parameters.
//!
//! Every constant the role loops consult lives in [`Config`].  The
//! multipliers were chosen empirically on a slow, lossy link; treat the
//! defaults as a starting point rather than as derived values.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::HEADER_LEN;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Largest datagram (header + payload) the channel carries.
    pub max_packet: usize,
    /// RTO before any RTT sample exists (syn stage).
    pub initial_rto: Duration,
    /// Lower clamp on the RTO handed to the loops.
    pub min_rto: Duration,
    /// Upper clamp on the RTO handed to the loops.
    pub max_rto: Duration,
    /// RTO multiplier applied after each unanswered syn.
    pub syn_backoff: f64,
    /// Damping constant `k` folded into every RTT sample.
    pub rtt_damping: f64,
    /// Sender idle wait for acknowledgements, in multiples of the RTO.
    pub poll_multiplier: f64,
    /// Receiver wait for the next packet, in multiples of the RTO.
    pub receive_wait_multiplier: f64,
    /// Receiver keepalive after the fin, in multiples of the RTO.
    pub linger_multiplier: f64,
    /// Floor of the receiver keepalive after the fin.
    pub min_linger: Duration,
    /// After a timeout, consecutive sends are spaced by `RTO / cooldown_divisor`.
    pub cooldown_divisor: f64,
    /// Congestion window at the start of a transfer, in segments.
    pub initial_window: u32,
    /// Slow-start threshold at the start of a transfer, in segments.
    pub initial_ssthresh: u32,
    /// Duplicate acknowledgements that trigger a fast retransmit.
    pub duplicate_ack_threshold: u32,
    /// How long the receiver waits for the first syn.
    pub connect_timeout: Duration,
    /// Give up the handshake after this many syns (`None` = never).
    pub max_syn_attempts: Option<u32>,
    /// Give up after this many timeouts without progress (`None` = never).
    pub max_consecutive_timeouts: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_packet: 1400,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_millis(10),
            max_rto: Duration::from_secs(60),
            syn_backoff: 1.2,
            rtt_damping: 1.0 / 20.0,
            poll_multiplier: 3.5,
            receive_wait_multiplier: 2.5,
            linger_multiplier: 2.5,
            min_linger: Duration::from_millis(500),
            cooldown_divisor: 2.3,
            initial_window: 1,
            initial_ssthresh: 32,
            duplicate_ack_threshold: 3,
            connect_timeout: Duration::from_secs(60),
            max_syn_attempts: None,
            max_consecutive_timeouts: None,
        }
    }
}

impl Config {
    /// Payload bytes carried by one full segment.
    pub fn segment_size(&self) -> usize {
        self.max_packet.saturating_sub(HEADER_LEN)
    }

    /// Reject parameter combinations the loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size() == 0 {
            return Err(Error::InvalidConfig("max_packet leaves no room for payload"));
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(Error::InvalidConfig("min_rto must be non-zero and not above max_rto"));
        }
        let factors = [
            self.syn_backoff,
            self.rtt_damping,
            self.poll_multiplier,
            self.receive_wait_multiplier,
            self.linger_multiplier,
            self.cooldown_divisor,
        ];
        if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(Error::InvalidConfig("multipliers must be positive and finite"));
        }
        if self.initial_window == 0 || self.initial_ssthresh == 0 {
            return Err(Error::InvalidConfig("initial window and threshold must be non-zero"));
        }
        if self.duplicate_ack_threshold == 0 {
            return Err(Error::InvalidConfig("duplicate_ack_threshold must be non-zero"));
        }
        Ok(())
    }
}
