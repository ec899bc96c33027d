//! Write pacing and retry backoff for document store calls
//!
//! Hosted document stores throttle bursts of writes. The pacer enforces a
//! minimum interval between successive operations; the backoff helper
//! spaces out retries of a single failing operation.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Enforces a minimum interval between successive operations
pub struct Pacer {
    /// Minimum interval between operations
    min_delay: Duration,
    /// Completion time of the previous paced operation
    last_op: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Create a pacer with the given minimum interval
    pub fn new(min_delay: Duration) -> Self {
        Pacer {
            min_delay,
            last_op: Mutex::new(None),
        }
    }

    /// Create a pacer that never waits (for tests and unthrottled stores)
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured minimum interval
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until the minimum interval since the previous operation has passed
    pub async fn pace(&self) {
        let min_delay = self.min_delay();
        if min_delay.is_zero() {
            return;
        }

        let wait_time = {
            let last_op = self.last_op.lock();
            last_op.and_then(|at| min_delay.checked_sub(at.elapsed()))
        };

        if let Some(wait) = wait_time {
            sleep(wait).await;
        }

        *self.last_op.lock() = Some(Instant::now());
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Doubling retry delays for one failing operation, capped at a minute
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    retries: u32,
}

impl ExponentialBackoff {
    /// Allow `max_retries` retries starting at `base_delay`
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        ExponentialBackoff {
            base_delay,
            max_delay: Duration::from_secs(60),
            max_retries,
            retries: 0,
        }
    }

    /// Delay before the next retry, or None once retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }

        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(self.retries));
        self.retries += 1;

        Some(delay.min(self.max_delay))
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}
