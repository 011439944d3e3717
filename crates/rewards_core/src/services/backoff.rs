//! Jittered exponential backoff between attempts.

use crate::models::RetryPolicy;

use std::time::Duration;

/// Computes how long to wait before a retry.
///
/// `delay(attempt) = uniform(0, 1) * min(max_delay, base_delay * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    /// Create a backoff policy from explicit bounds.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    /// Create a backoff policy from a retry policy.
    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.base_delay, policy.max_delay)
    }

    /// Deterministic upper bound for `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        // 2^attempt overflows u32 past 31; saturate instead
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay before attempt `attempt` (1-based, called for 2..).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.scaled(attempt, rand::random::<f64>())
    }

    /// Delay for a given jitter sample in `[0, 1)`.
    pub fn scaled(&self, attempt: u32, jitter: f64) -> Duration {
        let nanos = self.ceiling(attempt).as_nanos() as f64 * jitter.clamp(0.0, 1.0);
        Duration::from_nanos(nanos as u64)
    }

    /// Sleep for a jittered delay before attempt `attempt`.
    pub async fn wait(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        tracing::trace!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
        delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_stays_within_bounds() {
        let backoff = BackoffPolicy::default();
        for attempt in 1..=40 {
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay <= Duration::from_secs(5), "attempt {attempt}: {delay:?}");
                assert!(delay <= backoff.ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_ceiling_grows_until_capped() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.ceiling(1), Duration::from_millis(40));
        assert_eq!(backoff.ceiling(2), Duration::from_millis(80));
        assert_eq!(backoff.ceiling(5), Duration::from_millis(640));
        assert_eq!(backoff.ceiling(8), Duration::from_secs(5));

        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let ceiling = backoff.ceiling(attempt);
            assert!(ceiling >= previous, "ceiling shrank at attempt {attempt}");
            assert!(ceiling <= Duration::from_secs(5));
            previous = ceiling;
        }
    }

    #[test]
    fn test_jitter_is_multiplicative() {
        let backoff = BackoffPolicy::default();
        assert_eq!(backoff.scaled(3, 0.0), Duration::ZERO);
        assert_eq!(backoff.scaled(3, 0.5), Duration::from_millis(80));
        assert_eq!(backoff.scaled(3, 1.0), Duration::from_millis(160));
        assert_eq!(backoff.scaled(3, 7.0), Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_returned_delay() {
        let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let delay = backoff.wait(2).await;
        assert!(start.elapsed() >= delay);
        assert!(delay <= Duration::from_millis(400));
    }
}
