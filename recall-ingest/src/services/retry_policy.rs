//! Connector retry policy
//!
//! Bounded attempts with exponential backoff and full jitter: the delay
//! before attempt `n + 1` is uniform in `[0, min(max, base * 2^(n-1))]`.

use rand::Rng;
use recall_common::config::{IngestConfig, RetryOverride};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per run, first try included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Orchestrator defaults with an optional per-connector override
    pub fn from_config(ingest: &IngestConfig, overrides: Option<&RetryOverride>) -> Self {
        let max_attempts = overrides
            .and_then(|o| o.max_attempts)
            .unwrap_or(ingest.max_attempts)
            .max(1);
        let base_ms = overrides
            .and_then(|o| o.backoff_base_ms)
            .unwrap_or(ingest.backoff_base_ms);
        let max_ms = overrides
            .and_then(|o| o.backoff_max_ms)
            .unwrap_or(ingest.backoff_max_ms);

        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms.max(base_ms)),
        }
    }

    pub fn allows_another_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Upper bound of the backoff after the `attempt`-th failure (1-based)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered delay after the `attempt`-th failure
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.backoff_ceiling(attempt).as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
        }
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_ceiling(1), Duration::from_millis(500));
        assert_eq!(p.backoff_ceiling(2), Duration::from_millis(1000));
        assert_eq!(p.backoff_ceiling(3), Duration::from_millis(2000));
        assert_eq!(p.backoff_ceiling(4), Duration::from_millis(3000));
        assert_eq!(p.backoff_ceiling(60), Duration::from_millis(3000));
    }

    #[test]
    fn test_delay_within_ceiling() {
        let p = policy();
        for attempt in 1..6 {
            assert!(p.delay_for(attempt) <= p.backoff_ceiling(attempt));
        }
    }

    #[test]
    fn test_attempt_budget() {
        let p = policy();
        assert!(p.allows_another_attempt(1));
        assert!(p.allows_another_attempt(2));
        assert!(!p.allows_another_attempt(3));
    }

    #[test]
    fn test_override_wins_over_defaults() {
        let ingest = IngestConfig::default();
        let overrides = RetryOverride {
            max_attempts: Some(5),
            backoff_base_ms: None,
            backoff_max_ms: Some(1000),
        };
        let p = RetryPolicy::from_config(&ingest, Some(&overrides));
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.base_delay, Duration::from_millis(ingest.backoff_base_ms));
        assert_eq!(p.max_delay, Duration::from_millis(1000));

        let defaults = RetryPolicy::from_config(&ingest, None);
        assert_eq!(defaults.max_attempts, ingest.max_attempts);
    }
}
