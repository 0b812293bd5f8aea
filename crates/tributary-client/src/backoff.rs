//! Reconnection backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff with jitter.
///
/// The undelayed schedule doubles from `base` up to `max`; each returned
/// delay is scaled by a random factor in `[0.5, 1.0]`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: &ReconnectConfig) -> Self {
        Self {
            base: policy.base_delay,
            max: policy.max_delay,
            current: policy.base_delay,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.base;
    }
}
