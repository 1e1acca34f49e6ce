//! Retry policy: decides whether to try again and how long to wait.

use std::time::Duration;

/// Retry policy for transient failures (provider calls, webhook delivery).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Total attempts including the first one. `1` disables retry.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Policy used for provider calls and webhooks unless configured otherwise.
    pub fn standard() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait after the `attempts`-th failure (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base_delay=200ms, multiplier=2.0:
    /// - attempt 1 (first failure): 200ms
    /// - attempt 2: 400ms
    /// - attempt 3: 800ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // powi が inf / NaN になったら base_delay に戻す
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn standard_policy_has_reasonable_values() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_attempts, 3);
    }

    #[rstest]
    #[case(0, 200)]
    #[case(1, 200)]
    #[case(2, 400)]
    #[case(3, 800)]
    fn exponential_backoff(#[case] attempts: u32, #[case] millis: u64) {
        assert_eq!(
            RetryPolicy::standard().next_delay(attempts),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn retry_budget_counts_the_first_attempt() {
        let policy = RetryPolicy::standard();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::none().allows_retry(1));
    }

    #[test]
    fn huge_exponent_does_not_panic() {
        let policy = RetryPolicy {
            multiplier: 10.0,
            ..RetryPolicy::standard()
        };
        assert_eq!(policy.next_delay(u32::MAX), policy.base_delay);
    }
}
