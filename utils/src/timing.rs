// Helpers for timing things
//
// Used for log timestamps and for measuring how long
// frames and dispatch passes take.
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_millis(0))
}

// Helper to get the current time in milliseconds
pub fn get_current_millis() -> u32 {
    get_current_time().as_millis() as u32
}

// A stopclock for measuring time intervals
//
// The order of use MUST be `new`, `start`, `end`
// after that the recorded duration can be
// got with `get_duration`
pub struct StopWatch {
    sw_start: Instant,
    sw_end: Instant,
}

impl StopWatch {
    // Create an empty stopwatch
    pub fn new() -> StopWatch {
        let now = Instant::now();
        StopWatch {
            sw_start: now,
            sw_end: now,
        }
    }

    pub fn start(&mut self) {
        self.sw_start = Instant::now();
    }

    pub fn end(&mut self) {
        self.sw_end = Instant::now();
    }

    pub fn get_duration(&self) -> Duration {
        self.sw_end.saturating_duration_since(self.sw_start)
    }
}

/// Tracks a fixed-period schedule starting at a known instant.
///
/// Each deadline is computed from the start point rather than from
/// the previous wakeup, so late wakeups never accumulate into drift.
pub struct Deadline {
    d_next: Instant,
    d_period: Duration,
}

impl Deadline {
    /// The first deadline is `start + first`, later ones are spaced
    /// `period` apart.
    pub fn new(start: Instant, first: Duration, period: Duration) -> Self {
        Self {
            d_next: start + first,
            d_period: period,
        }
    }

    pub fn next(&self) -> Instant {
        self.d_next
    }

    /// Move on to the following deadline
    pub fn advance(&mut self) {
        self.d_next += self.d_period;
    }

    /// Time left until the current deadline, zero if it has passed
    pub fn remaining(&self) -> Duration {
        self.d_next.saturating_duration_since(Instant::now())
    }
}
