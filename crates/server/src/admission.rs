// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration admission control: rate limit and field validation.

use std::time::Instant;

use parking_lot::Mutex;
use shiplog_proto::limits::{MAX_HOSTNAME_LEN, MAX_NAME_LEN, MAX_VERSION_LEN};
use shiplog_proto::AgentInfo;

/// Token bucket limiting registrations.
///
/// Refills continuously at `rate` tokens per second up to `burst`;
/// each admission spends one token.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Spend one token if available.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.refilled_at);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        state.refilled_at = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Check registration field limits.
///
/// The returned message goes verbatim into the denial response.
pub fn validate_agent(info: &AgentInfo) -> Result<(), String> {
    if info.hostname.len() > MAX_HOSTNAME_LEN {
        return Err("hostname exceeds maximum length".to_string());
    }
    if info.name.len() > MAX_NAME_LEN {
        return Err("name exceeds maximum length".to_string());
    }
    if info.version.len() > MAX_VERSION_LEN {
        return Err("version exceeds maximum length".to_string());
    }
    Ok(())
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
