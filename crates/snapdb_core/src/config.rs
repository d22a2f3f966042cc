//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
///
/// The backoff settings shape how a commit waits when another transaction
/// holds one of its object locks: the first wait is drawn from
/// `initial_backoff - rand(0..backoff_jitter)`, and the budget grows by
/// `backoff_growth` after every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Starting backoff budget.
    pub initial_backoff: Duration,

    /// Upper bound of the random amount subtracted from the budget.
    pub backoff_jitter: Duration,

    /// Multiplier applied to the budget after each retry.
    pub backoff_growth: f64,

    /// Timeout used by [`crate::Database::transact_default`].
    pub default_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            backoff_jitter: Duration::from_millis(10),
            backoff_growth: 1.05,
            default_timeout: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the starting backoff budget.
    #[must_use]
    pub const fn initial_backoff(mut self, value: Duration) -> Self {
        self.initial_backoff = value;
        self
    }

    /// Sets the random jitter subtracted from each delay.
    #[must_use]
    pub const fn backoff_jitter(mut self, value: Duration) -> Self {
        self.backoff_jitter = value;
        self
    }

    /// Sets the per-retry budget multiplier.
    #[must_use]
    pub const fn backoff_growth(mut self, value: f64) -> Self {
        self.backoff_growth = value;
        self
    }

    /// Sets the timeout used when none is given explicitly.
    #[must_use]
    pub const fn default_timeout(mut self, value: Option<Duration>) -> Self {
        self.default_timeout = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.initial_backoff, Duration::from_millis(10));
        assert_eq!(config.backoff_jitter, Duration::from_millis(10));
        assert!((config.backoff_growth - 1.05).abs() < f64::EPSILON);
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .initial_backoff(Duration::from_millis(1))
            .backoff_growth(2.0)
            .default_timeout(Some(Duration::from_secs(1)));

        assert_eq!(config.initial_backoff, Duration::from_millis(1));
        assert!((config.backoff_growth - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(1)));
    }
}
