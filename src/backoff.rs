//! Per-claim backoff bookkeeping for the controller error policy
//!
//! The error policy cannot await anything, so retry state lives here: a
//! concurrent map from claim name to consecutive-failure count. Delays grow
//! exponentially with jitter and reset as soon as a claim reconciles cleanly.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

/// Tuning for the error-policy backoff schedule
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failure (before jitter)
    pub initial_delay: Duration,
    /// Upper bound on the delay (before jitter)
    pub max_delay: Duration,
    /// Multiplier applied for each consecutive failure
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

/// Tracks consecutive reconciliation failures per claim
///
/// Keyed by claim name. [`BackoffTracker::next_delay`] records a failure and
/// returns the requeue delay for it; [`BackoffTracker::reset`] clears the
/// claim's entry after a successful reconciliation so the next failure starts
/// over from the initial delay.
#[derive(Debug, Default)]
pub struct BackoffTracker {
    config: BackoffConfig,
    failures: DashMap<String, u32>,
}

impl BackoffTracker {
    /// Create a tracker with the given schedule
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return the delay before the next retry
    ///
    /// Jitter of 0.5x to 1.5x prevents synchronized retries when many claims
    /// fail at once (a zone running out of capacity fails every pending claim
    /// in the same second).
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut entry = self.failures.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let exponent = attempt.saturating_sub(1).min(30);
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(exponent as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter)
    }

    /// Forget the failure history for `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|entry| *entry).unwrap_or(0)
    }
}
