//! Retry policy applied after a failed delivery attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default number of attempts before a delivery is failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECONDS: u32 = 60;

/// Upper bound on `retry_delay_seconds` accepted from administrators.
pub const MAX_RETRY_DELAY_SECONDS: u32 = 86_400;

/// Per-subscription retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_seconds: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
        }
    }
}

/// How the delay grows between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait `retry_delay_seconds`.
    #[default]
    Fixed,
    /// `retry_delay_seconds * 2^(attempt - 1)`, capped.
    Exponential { max_delay_seconds: u32 },
}

/// What to do with a delivery whose latest attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    Exhausted,
}

impl BackoffStrategy {
    /// Delay before the attempt following `attempt_count` completed attempts.
    ///
    /// Never shorter than one second.
    pub fn delay(&self, policy: &RetryPolicy, attempt_count: u32) -> Duration {
        let base = u64::from(policy.retry_delay_seconds.max(1));
        let seconds = match self {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential { max_delay_seconds } => {
                let exponent = attempt_count.saturating_sub(1).min(32);
                let cap = u64::from((*max_delay_seconds).max(1));
                base.saturating_mul(1u64 << exponent).min(cap).max(1)
            }
        };
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::from(MAX_RETRY_DELAY_SECONDS)))
    }
}

impl RetryPolicy {
    /// Decide the next step once `attempt_count` attempts have failed.
    ///
    /// `max_retries` is the total attempt budget: with `max_retries = 3` the
    /// third failure is terminal. A budget of zero fails on the first attempt.
    pub fn decide(
        &self,
        attempt_count: u32,
        backoff: BackoffStrategy,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if attempt_count < self.max_retries {
            RetryDecision::RetryAt(now + backoff.delay(self, attempt_count))
        } else {
            RetryDecision::Exhausted
        }
    }
}
