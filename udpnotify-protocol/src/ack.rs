//! Ack mask bookkeeping and RTT estimation

use crate::packet::ACK_MASK_BITS;

/// Fate of one notify packet once the remote has reported past it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Delivered,
    Lost,
}

/// Result of reconciling one send window entry against a remote ack
#[derive(Debug, Clone, PartialEq)]
pub struct AckedPacket<U> {
    pub sequence: u64,
    pub outcome: AckOutcome,
    pub user_data: Option<U>,
}

/// Shift a newly received packet into a receive mask
///
/// `distance` is how far the new packet is ahead of the previous newest one
/// and must be positive. Skipped sequence numbers shift in as zeros.
#[inline]
pub fn advance_mask(mask: u64, distance: i64) -> u64 {
    debug_assert!(distance > 0);

    if distance >= ACK_MASK_BITS {
        1
    } else {
        (mask << distance) | 1
    }
}

/// Decide delivery for a packet `distance` behind the remote's newest
///
/// `distance` is `sequence - remote_recv_sequence` and must be zero or
/// negative. Zero is the remote's newest packet and always counts as
/// delivered.
#[inline]
pub fn outcome_for(distance: i64, remote_mask: u64) -> AckOutcome {
    debug_assert!(distance <= 0);

    let behind = -distance;
    if behind == 0 {
        return AckOutcome::Delivered;
    }

    if behind < ACK_MASK_BITS && remote_mask & (1u64 << behind) != 0 {
        AckOutcome::Delivered
    } else {
        AckOutcome::Lost
    }
}

/// RTT estimator
///
/// Keeps the latest raw sample alongside an exponentially smoothed RTT and
/// its variance. All values are in seconds.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    latest: f64,
    srtt: f64,
    rtt_var: f64,
    sample_count: u32,
}

impl RttEstimator {
    /// Create a new RTT estimator
    pub fn new() -> Self {
        RttEstimator {
            latest: 0.0,
            srtt: 0.1, // Initial estimate: 100ms
            rtt_var: 0.05,
            sample_count: 0,
        }
    }

    /// Update with a new RTT sample
    pub fn update(&mut self, sample: f64) {
        let sample = sample.max(0.0);
        self.latest = sample;

        if self.sample_count == 0 {
            // First sample
            self.srtt = sample;
            self.rtt_var = sample / 2.0;
        } else {
            let alpha = 0.125;
            let beta = 0.25;

            let error = sample - self.srtt;
            self.srtt += alpha * error;
            self.rtt_var = (1.0 - beta) * self.rtt_var + beta * error.abs();
        }

        self.sample_count += 1;
    }

    /// Most recent raw sample
    pub fn latest(&self) -> f64 {
        self.latest
    }

    /// Smoothed RTT
    pub fn srtt(&self) -> f64 {
        self.srtt
    }

    /// RTT variance
    pub fn rtt_var(&self) -> f64 {
        self.rtt_var
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_mask() {
        assert_eq!(advance_mask(0b1, 1), 0b11);
        // one packet skipped
        assert_eq!(advance_mask(0b111, 2), 0b11101);
        assert_eq!(advance_mask(u64::MAX, 63), (1u64 << 63) | 1);
        assert_eq!(advance_mask(u64::MAX, 64), 1);
        assert_eq!(advance_mask(u64::MAX, 500), 1);
    }

    #[test]
    fn test_outcome_for() {
        // seq: 5, mask 1011 -> 5, 4 and 2 received, 3 missing
        let mask = 0b1011;
        assert_eq!(outcome_for(0, mask), AckOutcome::Delivered);
        assert_eq!(outcome_for(-1, mask), AckOutcome::Delivered);
        assert_eq!(outcome_for(-2, mask), AckOutcome::Lost);
        assert_eq!(outcome_for(-3, mask), AckOutcome::Delivered);
        assert_eq!(outcome_for(-4, mask), AckOutcome::Lost);
    }

    #[test]
    fn test_outcome_past_mask() {
        assert_eq!(outcome_for(-63, u64::MAX), AckOutcome::Delivered);
        assert_eq!(outcome_for(-64, u64::MAX), AckOutcome::Lost);
        assert_eq!(outcome_for(-1000, u64::MAX), AckOutcome::Lost);
    }

    #[test]
    fn test_rtt_first_sample() {
        let mut rtt = RttEstimator::new();
        rtt.update(0.04);

        assert_eq!(rtt.latest(), 0.04);
        assert_eq!(rtt.srtt(), 0.04);
        assert_eq!(rtt.rtt_var(), 0.02);
        assert_eq!(rtt.sample_count(), 1);
    }

    #[test]
    fn test_rtt_smoothing() {
        let mut rtt = RttEstimator::new();
        rtt.update(0.1);
        rtt.update(0.2);

        assert_eq!(rtt.latest(), 0.2);
        assert!(rtt.srtt() > 0.1 && rtt.srtt() < 0.2);
    }

    #[test]
    fn test_rtt_negative_sample_clamped() {
        let mut rtt = RttEstimator::new();
        rtt.update(-1.0);
        assert_eq!(rtt.latest(), 0.0);
    }
}
