//! Retransmission-timeout estimation.
//!
//! [`RtoEstimator`] keeps the weighted contributions of the last
//! [`RTT_SLOTS`] round-trip samples summed directly into the RTO, so a
//! sample ages out exactly when its ring slot is overwritten:
//!
//! ```text
//!   seen < 16:  rto *= seen / 16                 (after seen += 1)
//!   seen = 16:  rto -= slot[cursor]              (reverse the evicted sample)
//!               slot[cursor] = rtt * k / 16
//!               rto += slot[cursor]
//!               rto *= 16 / seen
//! ```
//!
//! The partial-buffer scaling pulls the syn-stage guess toward real
//! measurements quickly; the handshake resets the value to zero before the
//! first sample so that guess does not linger.  Updates are O(1) with a
//! fixed-size array and no running sum recomputation.
//!
//! The raw estimate is kept unclamped; [`RtoEstimator::rto`] applies the
//! configured floor and ceiling when the loops read it.

use std::time::Duration;

use crate::config::Config;

/// Number of RTT contributions retained.
pub const RTT_SLOTS: usize = 16;

#[derive(Debug, Clone)]
pub struct RtoEstimator {
    slots: [f64; RTT_SLOTS],
    /// Slot the next sample is written to.
    cursor: usize,
    /// Samples folded in so far, capped at [`RTT_SLOTS`].
    seen: usize,
    /// Current estimate in seconds.
    rto: f64,
    damping: f64,
    min_rto: Duration,
    max_rto: Duration,
}

impl RtoEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            slots: [0.0; RTT_SLOTS],
            cursor: 0,
            seen: 0,
            rto: config.initial_rto.as_secs_f64(),
            damping: config.rtt_damping,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
        }
    }

    /// Fold one round-trip sample (`now - sent_at`) into the estimate.
    pub fn on_sample(&mut self, rtt: Duration) {
        if self.seen < RTT_SLOTS {
            self.seen += 1;
            self.rto *= self.seen as f64 / RTT_SLOTS as f64;
        } else {
            self.rto -= self.slots[self.cursor];
        }

        self.slots[self.cursor] = rtt.as_secs_f64() * self.damping / RTT_SLOTS as f64;
        self.rto += self.slots[self.cursor];
        self.cursor = (self.cursor + 1) % RTT_SLOTS;

        self.rto *= RTT_SLOTS as f64 / self.seen as f64;
    }

    /// Drop the syn-stage guess once the handshake is answered.
    pub fn reset(&mut self) {
        self.rto = 0.0;
    }

    /// Multiply the estimate by `factor` (handshake back-off).
    pub fn back_off(&mut self, factor: f64) {
        self.rto *= factor;
    }

    /// The RTO the loops should wait, clamped to `[min_rto, max_rto]`.
    pub fn rto(&self) -> Duration {
        let secs = self
            .rto
            .clamp(self.min_rto.as_secs_f64(), self.max_rto.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// `factor × rto()`, used for the various poll and keepalive waits.
    pub fn scaled(&self, factor: f64) -> Duration {
        self.rto().mul_f64(factor)
    }

    /// Unclamped estimate in seconds.
    pub fn raw_secs(&self) -> f64 {
        self.rto
    }

    pub fn samples_seen(&self) -> usize {
        self.seen
    }
}
