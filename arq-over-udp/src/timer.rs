//! Retransmission deadline.
//!
//! Every blocking wait in the transport is bounded by one fixed timeout.
//! [`RetransmitTimer`] holds the single deadline the current wait runs
//! against: the drive loops restart it when the oldest outstanding packet
//! changes or after a retransmission, and treat its expiry as the only
//! signal of loss.
//!
//! There is no RTT estimation or back-off; the interval never changes.

use std::time::Duration;

use tokio::time::Instant;

/// A restartable single-deadline timer.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    interval: Duration,
    deadline: Instant,
    /// Consecutive expiries since the last restart caused by progress.
    expiries: u32,
}

impl RetransmitTimer {
    /// Create a timer armed `interval` from now.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
            expiries: 0,
        }
    }

    /// The instant the current wait gives up.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Re-arm after progress; clears the expiry count.
    pub fn restart(&mut self) {
        self.deadline = Instant::now() + self.interval;
        self.expiries = 0;
    }

    /// Record an expiry and re-arm for the next interval.
    ///
    /// Returns the number of consecutive expiries including this one.
    pub fn on_expired(&mut self) -> u32 {
        self.expiries += 1;
        self.deadline = Instant::now() + self.interval;
        self.expiries
    }

    /// Consecutive expiries without progress.
    pub fn expiries(&self) -> u32 {
        self.expiries
    }
}
