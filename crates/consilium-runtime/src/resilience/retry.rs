//! Uniform retry policy for backend calls.

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How failed backend attempts are retried.
///
/// Applied by the fan-out layer to every unit; only retryable backend
/// errors are retried and each attempt re-acquires a rate-limit token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry)
    pub max_attempts: u32,

    #[serde(with = "crate::config::duration")]
    pub min_delay: Duration,

    #[serde(with = "crate::config::duration")]
    pub max_delay: Duration,

    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Exponential backoff between attempts.
    pub fn backoff(&self) -> ExponentialBuilder {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_max_times(retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert!(policy.jitter);
    }

    #[test]
    fn test_deserialize_humantime() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_attempts: 5\nmin_delay: 250ms\nmax_delay: 1m\n").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.min_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(policy.jitter);
    }

    #[test]
    fn test_none_is_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
