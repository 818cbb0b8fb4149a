use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between connection attempts: `min(base * factor^retry, cap)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "humantime_serde")]
    pub base: Duration,
    pub factor: u32,
    #[serde(with = "humantime_serde")]
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// The wait after the `retry`-th failed attempt, counting from zero.
    pub fn delay(&self, retry: u32) -> Duration {
        self.factor
            .checked_pow(retry)
            .and_then(|multiplier| self.base.checked_mul(multiplier))
            .map(|delay| delay.min(self.cap))
            .unwrap_or(self.cap)
    }
}
