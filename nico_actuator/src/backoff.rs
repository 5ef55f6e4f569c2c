//! Reconnect delay policy.
//!
//! Delays start at `initial`, grow by `factor` after each failed attempt
//! and are capped at `max`. A successful connect resets to `initial`.
//! With the defaults the sequence is 0.3s, 0.45s, 0.675s, ... 3.0s, 3.0s.

use nico_common::config::ActuatorConfig;
use nico_common::consts::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_INITIAL_SECS, DEFAULT_BACKOFF_MAX_SECS,
};
use std::time::Duration;

/// Capped exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First delay, and the value restored by [`Backoff::reset`].
    pub initial: Duration,
    /// Growth factor applied after each failure (>= 1.0).
    pub factor: f64,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs_f64(DEFAULT_BACKOFF_INITIAL_SECS),
            factor: DEFAULT_BACKOFF_FACTOR,
            max: Duration::from_secs_f64(DEFAULT_BACKOFF_MAX_SECS),
        }
    }
}

impl From<&ActuatorConfig> for BackoffPolicy {
    /// Values that do not form a valid duration fall back to the defaults.
    fn from(config: &ActuatorConfig) -> Self {
        let defaults = Self::default();
        Self {
            initial: Duration::try_from_secs_f64(config.backoff_initial_secs)
                .unwrap_or(defaults.initial),
            factor: if config.backoff_factor.is_finite() {
                config.backoff_factor.max(1.0)
            } else {
                defaults.factor
            },
            max: Duration::try_from_secs_f64(config.backoff_max_secs).unwrap_or(defaults.max),
        }
    }
}

/// Running backoff state owned by the relay worker.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// Start a backoff sequence at `policy.initial`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial.min(policy.max),
            policy,
        }
    }

    /// Delay to sleep before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.policy.factor)
            .map_or(self.policy.max, |next| next.min(self.policy.max));
        delay
    }

    /// Delay the next failure would produce, without advancing.
    #[inline]
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Restore the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
    }
}
