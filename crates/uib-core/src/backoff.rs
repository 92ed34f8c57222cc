//! Reconnection backoff calculation.
//!
//! Pure math only; the client crate owns the mutable attempt counter and
//! supplies the randomness.
//!
//! Formula: `min(base * factor^attempts ± jitter * that, max)`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default first delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 2.0;
/// Default jitter fraction (0.0–1.0).
pub const DEFAULT_JITTER: f64 = 0.5;

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any delay.
    pub max_delay_ms: u64,
    /// Multiplier per failed attempt.
    pub factor: f64,
    /// Symmetric jitter as a fraction of the un-jittered delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempts` (zero-based).
    ///
    /// `random` must be in `[0.0, 1.0)`; it maps to a deviation in
    /// `[-jitter, +jitter)` of the exponential value. The result never
    /// exceeds `max_delay_ms`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay(&self, attempts: u32, random: f64) -> Duration {
        let max = self.max_delay_ms as f64;
        let exponent = attempts.min(64) as i32;
        let exponential = (self.base_delay_ms as f64) * self.factor.max(1.0).powi(exponent);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let deviation = (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter * exponential;
        let jittered = if exponential.is_finite() {
            exponential + deviation
        } else {
            max
        };
        let bounded = jittered.clamp(0.0, max);
        Duration::from_millis(bounded.round() as u64)
    }

    /// Delay without jitter (the expected value).
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        Self {
            jitter: 0.0,
            ..self.clone()
        }
        .delay(attempts, 0.5)
    }
}
