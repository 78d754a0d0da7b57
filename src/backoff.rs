//! Exponential backoff with jitter for room reconnects
//!
//! `delay(attempt) = min(base * 2^attempt, max_delay) + jitter(0..=jitter)`.
//! The attempt counter is reset once a connection has stayed open for
//! `reset_after`, and a configured `max_attempts` turns a run of failures
//! into a fatal outcome for the room.

use rand::Rng;
use std::time::Duration;

/// Configuration for reconnect backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every step
    pub jitter: Duration,
    /// Open time after which the attempt counter starts over
    pub reset_after: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
            reset_after: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

/// Per-connection backoff state
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of consecutive failures recorded since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Deterministic part of the delay for a given attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once `max_attempts` is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_attempts) = self.config.max_attempts {
            if self.attempt >= max_attempts {
                return None;
            }
        }

        let delay = self.base_delay(self.attempt) + self.jitter();
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Start over from the base delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Whether a connection open for `open_for` has earned a reset
    pub fn should_reset(&self, open_for: Duration) -> bool {
        open_for >= self.config.reset_after
    }

    fn jitter(&self) -> Duration {
        let window = self.config.jitter.as_millis() as u64;
        if window == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=window))
    }
}
