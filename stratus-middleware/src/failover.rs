//! Failover budget and backoff.

use std::time::Duration;

use rand::Rng;

use stratus_core::StratusError;

/// How many sequential attempts a failover call may make, and how long
/// to pause between them.
///
/// The default is three attempts in total with no pause: the next
/// attempt goes to a different endpoint, so waiting buys little.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub jitter: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl FailoverConfig {
    /// Create a new failover configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total attempt budget. Values below one mean one.
    #[must_use]
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// The effective attempt budget.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pause before retry number `retry` (0 = before the second attempt).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay.as_secs_f64() * factor)
        } else {
            delay
        }
    }

    /// Whether `error` may be retried on another endpoint.
    #[must_use]
    pub fn is_retryable(error: &StratusError) -> bool {
        error.is_transport_class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::TransportError;

    #[test]
    fn test_defaults() {
        let config = FailoverConfig::default();
        assert_eq!(config.attempts(), 3);
        assert_eq!(config.delay_for_retry(0), Duration::ZERO);
        assert_eq!(config.delay_for_retry(5), Duration::ZERO);
        assert_eq!(FailoverConfig::new().max_attempts(0).attempts(), 1);
    }

    #[test]
    fn test_exponential_backoff() {
        let config = FailoverConfig::new()
            .initial_delay(Duration::from_millis(100))
            .backoff_multiplier(2.0);

        assert_eq!(config.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(400));
    }

    #[test]
    fn test_max_delay_cap_and_jitter_bounds() {
        let config = FailoverConfig::new()
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .backoff_multiplier(10.0);
        assert_eq!(config.delay_for_retry(5), Duration::from_secs(5));

        let jittered = config.jitter(true);
        for _ in 0..20 {
            let delay = jittered.delay_for_retry(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FailoverConfig::is_retryable(&StratusError::Timeout(Duration::from_secs(1))));
        assert!(FailoverConfig::is_retryable(&TransportError::ConnectionClosed.into()));
        assert!(!FailoverConfig::is_retryable(&StratusError::remote(13, "boom")));
        assert!(!FailoverConfig::is_retryable(&StratusError::Cancelled));
        assert!(!FailoverConfig::is_retryable(&StratusError::NoCandidate("svc".into())));
    }
}
