// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with jitter.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

/// Backoff tunables.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Each delay is scaled by `1 ± jitter` uniformly
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Delay sequence for reconnect attempts.
///
/// `next()` grows geometrically until clamped at `max`; `reset()` is
/// called after a successful connect. Safe to call from concurrent
/// tasks.
pub struct Backoff {
    config: BackoffConfig,
    attempt: Mutex<u32>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: Mutex::new(0),
        }
    }

    /// Next delay, advancing the attempt counter.
    pub fn next(&self) -> Duration {
        let attempt = {
            let mut guard = self.attempt.lock();
            let current = *guard;
            *guard = guard.saturating_add(1);
            current
        };

        let base = self.config.initial.as_secs_f64() * self.config.multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max.as_secs_f64());

        let factor = if self.config.jitter > 0.0 {
            1.0 + rand::rng().random_range(-self.config.jitter..=self.config.jitter)
        } else {
            1.0
        };

        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Forget accumulated attempts.
    pub fn reset(&self) {
        *self.attempt.lock() = 0;
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
