//! Reconnect policy for egress links

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter
///
/// The delay before retry `i` (0-based) is `min(base * 2^i, max)` scaled by a
/// random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter, 0.0..=1.0
    pub jitter: f64,
    /// Consecutive retries allowed before the link gives up (None = unlimited)
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Relative jitter, clamped to `0.0..=1.0`; NaN disables jitter
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn unlimited_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Backoff before retry `attempt`, without jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff before retry `attempt`, jittered
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter.is_nan() || self.jitter <= 0.0 {
            return nominal;
        }
        let jitter = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::try_from_secs_f64(nominal.as_secs_f64() * factor).unwrap_or(nominal)
    }

    /// Whether another retry is allowed after `consecutive` retries
    pub fn allows_retry(&self, consecutive: u32) -> bool {
        self.max_retries.map_or(true, |max| consecutive < max)
    }
}
