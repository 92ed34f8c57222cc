//! Coarse connection watchdog.
//!
//! Independent of the heartbeat: every check that finds the link down
//! stretches the next delay by `factor`, up to `max_delay_ms`, and forces a
//! fresh connect attempt. A healthy check resets the delay.

use std::time::Duration;

use crate::config::WatchdogPolicy;

/// Watchdog delay and depth.
#[derive(Clone, Debug)]
pub struct Watchdog {
    policy: WatchdogPolicy,
    delay: Duration,
    depth: u64,
}

/// What a check decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// The link is up.
    Healthy,
    /// The link is down; force a reconnect.
    Stale,
}

impl Watchdog {
    /// New watchdog at its base delay.
    pub fn new(policy: WatchdogPolicy) -> Self {
        let delay = Duration::from_millis(policy.base_delay_ms);
        Self {
            policy,
            delay,
            depth: 0,
        }
    }

    /// Delay until the next check.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Consecutive stale checks.
    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Record a check result and compute the next delay.
    pub fn check(&mut self, connected: bool) -> WatchdogVerdict {
        if connected {
            self.reset();
            return WatchdogVerdict::Healthy;
        }
        self.depth = self.depth.saturating_add(1);
        self.delay = self.stretched();
        WatchdogVerdict::Stale
    }

    /// `base * factor^depth`, clamped to the ceiling.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    fn stretched(&self) -> Duration {
        let max = self.policy.max_delay_ms.max(self.policy.base_delay_ms) as f64;
        let exponent = self.depth.min(64) as i32;
        let grown = (self.policy.base_delay_ms as f64) * self.policy.factor.max(1.0).powi(exponent);
        let bounded = if grown.is_finite() { grown.min(max) } else { max };
        Duration::from_millis(bounded.round() as u64)
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.delay = Duration::from_millis(self.policy.base_delay_ms);
        self.depth = 0;
    }
}
