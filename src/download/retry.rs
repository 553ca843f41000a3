//! Attempt budget and backoff for network failures.
//!
//! Only [`JobError::TransientNetwork`] is worth another attempt; everything
//! else ends the job. Delays double from `base_delay` up to `max_delay`, with
//! a little random jitter so jobs that broke together do not reconnect
//! together. A server's Retry-After hint, when present, replaces the computed
//! delay in the runner.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::JobError;

/// Attempts per job when the user sets nothing (first attempt included).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Whether a failure can go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Dropped connection, timeout, 5xx, throttling.
    Transient,
    /// Anything a retry cannot fix.
    Permanent,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then make attempt number `attempt`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
        /// Number of the next attempt (the first retry is 2).
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Why, for the logs.
        reason: String,
    },
}

/// Bounded exponential backoff: `min(base * multiplier^(n-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// A policy with explicit timing. `max_attempts` is raised to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            max_jitter: MAX_JITTER,
        }
    }

    /// Default timing with a run-specific attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Same policy, deterministic delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows the failure of attempt number `attempt`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure: FailureType, attempt: u32) -> RetryDecision {
        if failure == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("all {} attempts used", self.max_attempts),
            };
        }

        let delay = self.delay_after(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = f64::from(attempt.saturating_sub(1));
        let grown = self.base_delay.as_millis() as f64
            * f64::from(self.backoff_multiplier).powf(exponent);
        let capped = grown.min(self.max_delay.as_millis() as f64) as u64;

        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Only network trouble is transient.
#[must_use]
pub fn classify_error(error: &JobError) -> FailureType {
    if error.is_transient() {
        FailureType::Transient
    } else {
        FailureType::Permanent
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32, max_delay_secs: u64) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_secs(1),
            Duration::from_secs(max_delay_secs),
            2.0,
        )
        .without_jitter()
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_delays_double_then_cap() {
        let policy = no_jitter(20, 5);
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_jitter_stays_under_half_a_second() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        for _ in 0..20 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_transient_failure_gets_next_attempt() {
        assert_eq!(
            no_jitter(3, 32).should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_budget_spent_after_last_attempt() {
        let decision = no_jitter(3, 32).should_retry(FailureType::Transient, 3);
        assert!(matches!(decision, RetryDecision::DoNotRetry { reason } if reason.contains('3')));
    }

    #[test]
    fn test_permanent_failure_never_retried() {
        assert!(matches!(
            no_jitter(10, 32).should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_only_network_errors_are_transient() {
        assert_eq!(
            classify_error(&JobError::transient("u", "timed out")),
            FailureType::Transient
        );
        for error in [
            JobError::resolution("u", "removed"),
            JobError::no_match("u", "audio"),
            JobError::rejected("u", "HTTP 404"),
            JobError::post_process("f", "bad codec"),
            JobError::Cancelled,
        ] {
            assert_eq!(classify_error(&error), FailureType::Permanent, "{error}");
        }
    }
}
