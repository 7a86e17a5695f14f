use std::time::Duration;

use rand::Rng;

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub min: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(30),
            factor: 1.5,
        }
    }
}

/// Exponential backoff with full jitter: each delay is drawn uniformly from
/// `[min, current]`, after which `current` grows by `factor` up to `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        let config = BackoffConfig {
            max: config.max.max(config.min),
            factor: config.factor.max(1.0),
            ..config
        };
        Self {
            current: config.min,
            config,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = if self.current > self.config.min {
            rand::thread_rng().gen_range(self.config.min..=self.current)
        } else {
            self.config.min
        };
        self.current = self
            .current
            .mul_f64(self.config.factor)
            .min(self.config.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.config.min;
    }
}
