//! Queue-wide circuit breaker.
//!
//! Consecutive push failures across the whole queue trip the breaker, so a
//! dead backend is tried once per cool-down instead of once per entry.

use chrono::{DateTime, Duration, Utc};

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
    /// Cool-down elapsed; one trial attempt is allowed.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    state: BreakerState,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            state: BreakerState::Closed,
            trial_in_flight: false,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.breaker_threshold,
            Duration::seconds(config.breaker_cooldown_secs as i64),
        )
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Asks permission for one automatic attempt.
    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open { until } if now >= until => {
                tracing::info!("Circuit half-open, allowing trial push");
                self.state = BreakerState::HalfOpen;
                self.trial_in_flight = true;
                true
            }
            BreakerState::Open { .. } => false,
            BreakerState::HalfOpen if !self.trial_in_flight => {
                self.trial_in_flight = true;
                true
            }
            BreakerState::HalfOpen => false,
        }
    }

    /// Gives back a half-open trial that ended without reaching the
    /// backend, so the next entry can take it.
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// The backend answered: close the breaker.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("Circuit closed");
        }
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.trial_in_flight = false;

        let trips = matches!(self.state, BreakerState::HalfOpen)
            || self.consecutive_failures >= self.threshold;
        if trips {
            let until = now + self.cooldown;
            tracing::warn!(
                failures = self.consecutive_failures,
                until = %until,
                "Circuit opened"
            );
            self.state = BreakerState::Open { until };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::seconds(60))
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = breaker();
        let now = Utc::now();

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert!(breaker.allow(now));
        breaker.record_failure(now);

        assert_eq!(
            breaker.state(),
            BreakerState::Open {
                until: now + Duration::seconds(60)
            }
        );
        assert!(!breaker.allow(now + Duration::seconds(59)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = breaker();
        let now = Utc::now();

        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[test]
    fn test_half_open_allows_single_trial() {
        let mut breaker = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure(now);
        }

        let later = now + Duration::seconds(61);
        assert!(breaker.allow(later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(!breaker.allow(later));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow(later));
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let mut breaker = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure(now);
        }

        let later = now + Duration::seconds(61);
        assert!(breaker.allow(later));
        breaker.release_trial();
        assert!(breaker.allow(later));
        assert!(!breaker.allow(later));
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut breaker = breaker();
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure(now);
        }

        let later = now + Duration::seconds(61);
        assert!(breaker.allow(later));
        breaker.record_failure(later);

        assert_eq!(
            breaker.state(),
            BreakerState::Open {
                until: later + Duration::seconds(60)
            }
        );
    }
}
