//! Commit backoff under lock contention.

use crate::config::Config;
use rand::Rng;
use std::time::Duration;

/// Upper bound on a single delay.
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Growing, jittered delay between commit attempts.
///
/// Each delay is `budget - rand(0..jitter)`, clamped at zero; the budget is
/// then multiplied by the growth factor.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    budget: Duration,
    jitter: Duration,
    growth: f64,
}

impl Backoff {
    pub(crate) fn new(config: &Config) -> Self {
        let growth = if config.backoff_growth.is_finite() && config.backoff_growth >= 1.0 {
            config.backoff_growth
        } else {
            1.0
        };
        Self {
            budget: config.initial_backoff.min(MAX_DELAY),
            jitter: config.backoff_jitter,
            growth,
        }
    }

    /// Returns the next delay and grows the budget.
    pub(crate) fn next_delay<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            self.jitter.mul_f64(rng.gen::<f64>())
        };
        let delay = self.budget.saturating_sub(jitter);
        self.budget = self.budget.mul_f64(self.growth).min(MAX_DELAY);
        delay
    }

    /// Sleeps for the next delay.
    pub(crate) fn wait(&mut self) {
        let delay = self.next_delay(&mut rand::thread_rng());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
