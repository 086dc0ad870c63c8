//! Reconnect backoff policy.

use rand::Rng;
use std::time::Duration;

/// Automatic reconnection parameters.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub enabled: bool,
    /// Maximum attempts before giving up; 0 means unlimited.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction: each delay is multiplied by a uniform factor in
    /// `1 - jitter ..= 1 + jitter`.
    pub jitter: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl ReconnectOptions {
    /// Deterministic backoff for attempt `n` (1-based):
    /// `min(max_delay, base_delay * 2^(n-1))`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 2u64.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
        delay.min(self.max_delay)
    }

    /// Backoff with the jitter factor applied.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let jitter = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        base.mul_f64(factor)
    }

    /// Whether attempt `n` (1-based) is still allowed.
    #[must_use]
    pub fn attempt_allowed(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}
