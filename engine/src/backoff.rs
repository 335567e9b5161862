//! Retry scheduling.
//!
//! A failed operation waits `base * 2^retry_count` before it becomes
//! eligible again. With the default one second base, the first failure
//! (retry count 1) waits 2s, the second 4s, and so on.

use std::time::Duration;

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit multiplied by `2^retry_count`
    pub base: Duration,
    /// Optional upper bound on a single delay
    pub max: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: None,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the given base delay and no cap.
    pub fn new(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Cap every delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Delay before the next attempt, given the retry count after the
    /// latest failure.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let delay = self
            .base
            .checked_mul(factor)
            .unwrap_or(Duration::from_millis(u64::MAX));

        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay in whole milliseconds, saturating.
    pub fn delay_millis(&self, retry_count: u32) -> u64 {
        u64::try_from(self.delay(retry_count).as_millis()).unwrap_or(u64::MAX)
    }
}
