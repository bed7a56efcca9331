//! Exponential backoff for failed cloud requests

use std::time::Duration;

use device_agent_shared::limits;
use rand::Rng;
use serde::Deserialize;

/// Retry delay policy. The n-th consecutive failure waits
/// `initial_delay_ms * multiply_factor^(n-1)`, capped at
/// `maximum_backoff_ms`, minus a random share of up to `jitter_factor`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub multiply_factor: f64,
    pub jitter_factor: f64,
    pub maximum_backoff_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: limits::BACKOFF_INITIAL_DELAY_MS,
            multiply_factor: limits::BACKOFF_MULTIPLY_FACTOR,
            jitter_factor: limits::BACKOFF_JITTER_FACTOR,
            maximum_backoff_ms: limits::BACKOFF_MAX_DELAY_MS,
        }
    }
}

/// Failure counter driving a [`BackoffPolicy`]
#[derive(Debug, Clone)]
pub struct BackoffEntry {
    policy: BackoffPolicy,
    failure_count: u32,
}

impl BackoffEntry {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failure_count: 0,
        }
    }

    /// Record the outcome of a request. Success resets the delay.
    pub fn inform_of_request(&mut self, success: bool) {
        if success {
            self.failure_count = 0;
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Delay before the next attempt; zero while nothing has failed
    pub fn next_delay(&self) -> Duration {
        if self.failure_count == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.failure_count - 1).min(i32::MAX as u32) as i32;
        let raw = self.policy.initial_delay_ms as f64 * self.policy.multiply_factor.powi(exponent);
        let capped = raw.min(self.policy.maximum_backoff_ms as f64);

        let jitter = self.policy.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            capped * (1.0 - rand::thread_rng().gen_range(0.0..jitter))
        } else {
            capped
        };
        Duration::from_millis(delay.max(0.0).round() as u64)
    }
}
