//! Reconnect backoff

use std::time::Duration;

/// Exponential reconnect schedule
///
/// Attempt `n` (starting at 0) waits `base_delay * 2^n`. After `max_attempts`
/// scheduled attempts the client gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    #[must_use]
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        (attempts_made < self.max_attempts).then(|| self.delay_for(attempts_made))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..5)
            .map(|n| u64::try_from(policy.delay_for(n).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_attempts: 2,
        };
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(20)));
        assert_eq!(policy.next_delay(2), None);
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = ReconnectPolicy::default();
        assert!(policy.delay_for(200) >= policy.delay_for(31));
    }
}
