use std::time::Duration;

use comms::specs::RetrySpec;
use rand::Rng;

/// Bounded exponential backoff with jitter for one request.
#[derive(Debug, Clone)]
pub struct Backoff {
    spec: RetrySpec,
    attempts: u32,
}

impl Backoff {
    pub fn new(spec: RetrySpec) -> Self {
        Self { spec, attempts: 1 }
    }

    /// The attempts made so far, the first one included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt.
    ///
    /// # Returns
    /// How long to wait before the next attempt, `None` once every attempt is used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.spec.max_attempts.max(1) {
            return None;
        }

        let exponent = (self.attempts - 1).min(i32::MAX as u32) as i32;
        self.attempts += 1;

        let max = self.spec.max_backoff();
        let base = self.spec.initial_backoff().as_secs_f64() * self.spec.multiplier.powi(exponent);
        let capped = if base.is_finite() && base >= 0.0 {
            base.min(max.as_secs_f64())
        } else {
            max.as_secs_f64()
        };

        let jitter = rand::rng().random_range(0.5..=1.0);
        let delay = Duration::try_from_secs_f64(capped * jitter).unwrap_or(max);
        Some(delay.min(max))
    }
}
