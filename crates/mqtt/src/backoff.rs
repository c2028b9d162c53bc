//! Exponential backoff for broker reconnection.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! With the defaults (1 s, x2, 60 s cap) the kernel waits 1, 2, 4, 8, ... 60,
//! 60, ... seconds. A successful CONNACK resets the sequence.

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

#[derive(Debug, Error)]
pub enum BackoffError {
    /// The attempt limit was reached. Carries the configured limit.
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Reconnect delay generator.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    /// `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates an unlimited backoff. Multipliers below 1.0 are clamped so the
    /// delay never shrinks.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max.max(initial),
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Builds the policy described by the transport configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut backoff = Self::new(
            config.reconnect_delay(),
            config.max_reconnect_delay(),
            config.reconnect_multiplier,
        );
        if config.max_reconnect_attempts > 0 {
            backoff.set_max_attempts(config.max_reconnect_attempts);
        }
        backoff
    }

    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Back to the initial delay. Called after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// sequence.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);
        if let Some(max) = self.max_attempts {
            if self.attempt > max {
                return Err(BackoffError::MaxAttemptLimitError(max));
            }
        }

        let sleep = self.current_delay;
        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 2.0);
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_sleep().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_unlimited_by_default() {
        let mut backoff = Backoff::default();
        for _ in 0..1000 {
            assert!(backoff.next_sleep().is_ok());
        }
        assert_eq!(backoff.current_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_max_attempts_exceeded() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(2);

        assert!(backoff.next_sleep().is_ok());
        assert!(backoff.next_sleep().is_ok());
        match backoff.next_sleep() {
            Err(BackoffError::MaxAttemptLimitError(max)) => assert_eq!(max, 2),
            other => panic!("expected attempt limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_from_config() {
        let config = Config {
            reconnect_delay: 5,
            max_reconnect_delay: 30,
            reconnect_multiplier: 1.5,
            max_reconnect_attempts: 4,
            ..Default::default()
        };
        let backoff = Backoff::from_config(&config);
        assert_eq!(backoff.current_delay(), Duration::from_secs(5));
        assert_eq!(backoff.max_delay(), Duration::from_secs(30));
        assert_eq!(backoff.max_attempts(), Some(4));

        let unlimited = Backoff::from_config(&Config::default());
        assert_eq!(unlimited.max_attempts(), None);
    }

    #[test]
    fn test_backoff_multiplier_below_one_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(10), 0.5);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_secs(2));
    }
}
