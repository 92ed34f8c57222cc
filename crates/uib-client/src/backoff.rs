//! Mutable reconnection backoff state.

use std::time::Duration;

use rand::Rng;
use uib_core::BackoffPolicy;

/// Attempt counter plus policy.
///
/// `attempts` counts failed cycles since the last successful open.
#[derive(Clone, Debug, Default)]
pub struct BackoffState {
    policy: BackoffPolicy,
    attempts: u32,
}

impl BackoffState {
    /// Start at zero attempts.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Failed cycles since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Delay before the next attempt, counting this failure.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(rand::rng().random::<f64>())
    }

    /// [`next_delay`](Self::next_delay) with caller-supplied randomness in `[0, 1)`.
    pub fn next_delay_with(&mut self, random: f64) -> Duration {
        let delay = self.policy.delay(self.attempts, random);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Back to zero after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
