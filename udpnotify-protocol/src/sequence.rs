//! Sequence Number Handling
//!
//! Notify packets carry sequence numbers packed into a configurable number of
//! bytes (1 to 8). This module provides the counter that hands them out and the
//! wraparound-aware distance used to order them.

use crate::codec::max_value;
use std::fmt;

/// Smallest supported sequence width in bytes
pub const MIN_SEQUENCE_BYTES: usize = 1;

/// Largest supported sequence width in bytes
pub const MAX_SEQUENCE_BYTES: usize = 8;

/// Fixed-width sequence number generator
///
/// Values live on a ring of `max + 1` slots where `max = 2^(8 * width) - 1`.
/// The counter starts at zero and wraps back to zero after `max`.
#[derive(Clone, PartialEq, Eq)]
pub struct Sequencer {
    width_bytes: usize,
    max: u64,
    half: u64,
    next_value: u64,
}

impl Sequencer {
    /// Create a new sequencer for `width_bytes`-wide sequence numbers
    ///
    /// # Panics
    /// Panics if `width_bytes` is outside 1..=8
    pub fn new(width_bytes: usize) -> Self {
        assert!(
            (MIN_SEQUENCE_BYTES..=MAX_SEQUENCE_BYTES).contains(&width_bytes),
            "Sequence width {} outside {}..={} bytes",
            width_bytes,
            MIN_SEQUENCE_BYTES,
            MAX_SEQUENCE_BYTES
        );

        let max = max_value(width_bytes);

        Sequencer {
            width_bytes,
            max,
            // (max + 1) / 2 without overflowing for the 8-byte ring
            half: (max >> 1) + 1,
            next_value: 0,
        }
    }

    /// Width of a packed sequence number in bytes
    #[inline]
    pub fn width_bytes(&self) -> usize {
        self.width_bytes
    }

    /// Largest representable sequence number
    #[inline]
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Half the ring size; distances resolve into `(-half, half]`
    #[inline]
    pub fn half(&self) -> u64 {
        self.half
    }

    /// Value the next call to [`Sequencer::next`] will return
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next_value
    }

    /// Return the current counter value and advance it
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u64 {
        let value = self.next_value;
        self.next_value = self.wrap(value.wrapping_add(1));
        value
    }

    /// Signed forward distance from `b` to `a` on the ring
    ///
    /// Positive means `a` is ahead of `b`, negative means `a` is behind.
    /// Values more than `half` apart alias onto the closer direction.
    pub fn distance(&self, a: u64, b: u64) -> i64 {
        let raw = self.wrap(a.wrapping_sub(b));

        if raw > self.half {
            // raw - (max + 1), computed without leaving u64
            -((self.max - raw) as i64) - 1
        } else {
            // the 8-byte half point is the one raw value past i64::MAX
            i64::try_from(raw).unwrap_or(i64::MAX)
        }
    }

    #[inline]
    fn wrap(&self, value: u64) -> u64 {
        value & self.max
    }
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sequencer(width={}, next={})",
            self.width_bytes, self.next_value
        )
    }
}
