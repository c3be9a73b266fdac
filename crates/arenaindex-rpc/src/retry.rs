//! Capped exponential backoff.
//!
//! Used in two places: inside [`HttpRpcClient`](crate::HttpRpcClient) for a
//! single request, and by the indexer driver between failed sync cycles.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Extra `jitter_fraction * delay` added on odd attempts so concurrent
    /// callers don't retry in lockstep (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy: maps an attempt number to a delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once
    /// `max_retries` is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Delay for the `attempt`-th consecutive failure with no retry limit.
    /// The driver uses this between failed cycles; it never gives up.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base_ms = self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exp);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        let jitter = if attempt % 2 == 1 {
            capped * self.config.jitter_fraction
        } else {
            0.0
        };
        let total = (capped + jitter).min(self.config.max_backoff.as_millis() as f64);
        Duration::from_millis(total as u64)
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn delays_double() {
        let policy = no_jitter(3);
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
        assert!(policy.next_delay(0).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.5,
        });
        for attempt in 1..=10 {
            let d = policy.next_delay(attempt).unwrap();
            assert!(d <= Duration::from_millis(500), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn unbounded_backoff_saturates() {
        let policy = no_jitter(0);
        assert!(policy.next_delay(1).is_none());
        assert_eq!(policy.backoff(1_000), Duration::from_secs(30));
    }

    #[test]
    fn should_retry_boundary() {
        let policy = no_jitter(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
