use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Dual-trigger flush policy: flush when the batch reaches `max_count`
/// entries, or when `max_age` has passed since the last flush.
pub struct FlushPolicy {
    max_age: Duration,
    max_count: usize,
    timer: Interval,
}

impl FlushPolicy {
    /// Must be called from within a tokio runtime.
    pub fn new(max_age: Duration, max_count: usize) -> Self {
        let mut timer = time::interval_at(Instant::now() + max_age, max_age);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            max_age,
            max_count,
            timer,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Await the next age deadline. The timer re-arms itself, so an expiry
    /// that finds nothing to flush still leaves the next one scheduled.
    pub async fn next_tick(&mut self) {
        self.timer.tick().await;
    }

    /// Whether a batch of `len` entries must be flushed now.
    pub fn is_full(&self, len: usize) -> bool {
        len >= self.max_count
    }

    /// Restart the age budget. Called before every delivery attempt.
    pub fn record_flush(&mut self) {
        self.timer.reset();
    }
}
