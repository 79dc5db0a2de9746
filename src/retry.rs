//! Retry pacing for coordinators.
//!
//! A coordinator never gives up on its slot. When a round fails to reach a
//! decision within the current interval it starts the next round with a higher
//! ballot, waiting a little longer each time up to a cap.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};

/// Parameters of a [`RetryPolicy`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Time a first round is given before the coordinator retries.
    pub initial_interval_ms: u64,
    /// Upper bound on the time between rounds.
    pub max_interval_ms: u64,
    /// Factor each interval grows by.
    pub multiplier: f64,
    /// Relative jitter applied to each interval, `0.0..1.0`.
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 50,
            max_interval_ms: 2_000,
            multiplier: 2.0,
            randomization_factor: 0.5,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self)
    }
}

/// Unbounded exponential backoff.
#[derive(Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        let cap = Duration::from_millis(config.max_interval_ms.max(1));

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(config.initial_interval_ms.max(1)))
            .with_max_interval(cap)
            .with_multiplier(config.multiplier)
            .with_randomization_factor(config.randomization_factor)
            .with_max_elapsed_time(None)
            .build();

        Self { backoff, cap }
    }

    /// The time to give the upcoming round.
    pub fn next_interval(&mut self) -> Duration {
        self.backoff.next_backoff().unwrap_or(self.cap)
    }

    /// Starts over from the initial interval.
    pub fn reset(&mut self) {
        self.backoff.reset();
    }
}
