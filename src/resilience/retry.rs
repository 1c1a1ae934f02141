//! Retry budget and exponential backoff with jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many attempts a task gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0..=1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy with no delays, mainly for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Whether another attempt is allowed after `attempts_used` attempts.
    pub fn should_retry(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    ///
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Delay after the given failed attempt with jitter applied.
    ///
    /// Never exceeds `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }

        let spread = rand::rng().random_range(-jitter..=jitter);
        let secs = nominal.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(secs.max(0.0)).min(self.max_delay)
    }
}
