//! Retry ceiling and exponential backoff for queue entries.

use chrono::{DateTime, Duration, Utc};

use crate::config::RetryConfig;

// 2^20 times any sane initial delay is already past every cap.
const MAX_EXPONENT: u32 = 20;

/// How often and how soon a failed entry is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::seconds(5),
            max_delay: Duration::seconds(900),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::seconds(config.initial_delay_secs as i64),
            max_delay: Duration::seconds(config.max_delay_secs as i64),
        }
    }

    /// Wait after the `retry_count`-th failure:
    /// `initial_delay * 2^(retry_count - 1)`, capped at `max_delay`.
    pub fn backoff(&self, retry_count: i64) -> Duration {
        if retry_count <= 0 {
            return Duration::zero();
        }
        let exponent = ((retry_count - 1) as u32).min(MAX_EXPONENT);
        let delay = self
            .initial_delay
            .checked_mul(2_i32.pow(exponent))
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Earliest time an entry may be attempted again. `None` means now.
    pub fn next_eligible(
        &self,
        retry_count: i64,
        last_attempt: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match last_attempt {
            Some(at) if retry_count > 0 => Some(at + self.backoff(retry_count)),
            _ => None,
        }
    }

    pub fn is_eligible(
        &self,
        retry_count: i64,
        last_attempt: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.next_eligible(retry_count, last_attempt)
            .map_or(true, |at| at <= now)
    }

    /// True once automatic retries are used up.
    pub fn is_exhausted(&self, retry_count: i64) -> bool {
        retry_count >= self.max_retries as i64
    }
}
