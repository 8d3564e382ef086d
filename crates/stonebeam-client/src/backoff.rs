//! Reconnect delay schedule.

use std::time::Duration;

/// Doubling delay with a cap and a retry budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_retries: u32,
    delay: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap,
            max_retries,
            delay: base,
            retries: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    ///
    /// Advances the schedule: the returned delay is doubled (up to the cap)
    /// for the following call.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.cap);
        self.retries += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.delay = self.base;
        self.retries = 0;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) would return.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}
