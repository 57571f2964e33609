//! Reconnect backoff policy
//!
//! Delays double from `initial_delay` up to `max_delay`. A connection that
//! stayed up for `stable_after` resets the attempt counter, so a tunnel that
//! drops once a day never walks into `Failed`.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Initial delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Attempts allowed before the engine gives up.
    pub max_attempts: u32,
    /// Uptime after which a connection counts as stable.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            stable_after: Duration::from_secs(config.stable_after_secs),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based). Never decreases as
    /// `attempt` grows.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << shift)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether the given attempt (1-based) is still within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Whether a connection that lived for `uptime` resets the counter.
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.stable_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.stable_after, Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = ReconnectPolicy::default();

        // 0.5s, 1s, 2s, 4s, 8s, 16s, 30s (capped), 30s
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_are_monotonic() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(7),
            max_delay: Duration::from_millis(1000),
            ..ReconnectPolicy::default()
        };
        let delays: Vec<_> = (1..64).map(|a| policy.delay_for_attempt(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_budget_and_stability() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!policy.is_stable(Duration::from_secs(59)));
        assert!(policy.is_stable(Duration::from_secs(60)));
    }
}
