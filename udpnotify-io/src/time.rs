//! Monotonic clock
//!
//! Every timer and RTT sample in the transport reads elapsed seconds from a
//! [`Clock`]. The clock is a stopwatch over `std::time::Instant`: it can be
//! paused and resumed, and elapsed time never goes backwards.

use std::time::{Duration, Instant};

/// Stopwatch-style monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Option<Instant>,
    elapsed: Duration,
}

impl Clock {
    /// Create a stopped clock at zero
    pub fn new() -> Self {
        Clock {
            start: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a clock that is already running
    pub fn start_new() -> Self {
        let mut clock = Clock::new();
        clock.start();
        clock
    }

    /// Resume counting; no-op if already running
    pub fn start(&mut self) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    /// Pause counting, keeping the time accumulated so far
    pub fn stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Stop and rewind to zero
    pub fn reset(&mut self) {
        self.start = None;
        self.elapsed = Duration::ZERO;
    }

    /// Rewind to zero and keep running
    pub fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
        self.start = Some(Instant::now());
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    /// Total time counted
    #[inline]
    pub fn elapsed(&self) -> Duration {
        match self.start {
            Some(start) => self.elapsed + start.elapsed(),
            None => self.elapsed,
        }
    }

    /// Total time counted, in seconds
    #[inline]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Total time counted, in milliseconds
    #[inline]
    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed_seconds() * 1000.0
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
