//! Retry policy shared by connection establishment and transaction execution.

use std::time::Duration;

/// Bounds on how often and how long failed work is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base unit of the exponential backoff.
    pub base_delay: Duration,
    /// Upper bound on a single backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Attempts made before giving up.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Create a policy with explicit bounds. `max_attempts` is at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
    }

    /// Whether another attempt may follow attempt `attempt` (1-based).
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(5),
        }
    }
}
