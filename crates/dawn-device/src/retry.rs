use std::time::Duration;

use dawn_core::config::DeviceConfig;

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: dawn_core::config::MAX_RETRY_ATTEMPTS,
            delay: Duration::from_millis(dawn_core::config::RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.max_retry_attempts, config.retry_delay())
    }

    /// Initial attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Pause before attempt number `attempt` (1-based); `None` for the first.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt > 1).then_some(self.delay)
    }

    /// `true` once `attempts_made` attempts leave no retry budget.
    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_four_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = RetryPolicy::new(2, Duration::from_secs(5));
        assert_eq!(policy.delay_before(1), None);
        assert_eq!(policy.delay_before(2), Some(Duration::from_secs(5)));
    }
}
