// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;
use yare::parameterized;

#[test]
fn burst_is_available_immediately() {
    let limiter = RateLimiter::new(10.0, 50.0);
    let now = Instant::now();

    let allowed = (0..50).filter(|_| limiter.allow_at(now)).count();
    assert_eq!(allowed, 50);
    assert!(!limiter.allow_at(now));
}

#[test]
fn bucket_refills_over_time() {
    let limiter = RateLimiter::new(10.0, 50.0);
    let start = Instant::now();

    // Drain the burst
    for _ in 0..50 {
        assert!(limiter.allow_at(start));
    }
    assert!(!limiter.allow_at(start));

    // One second at 10/s buys ten more admissions
    let later = start + Duration::from_secs(1);
    let allowed = (0..20).filter(|_| limiter.allow_at(later)).count();
    assert_eq!(allowed, 10);
}

#[test]
fn refill_never_exceeds_burst() {
    let limiter = RateLimiter::new(10.0, 5.0);
    let start = Instant::now();

    let much_later = start + Duration::from_secs(3600);
    let allowed = (0..10).filter(|_| limiter.allow_at(much_later)).count();
    assert_eq!(allowed, 5);
}

fn info_with(hostname: usize, name: usize, version: usize) -> AgentInfo {
    AgentInfo {
        hostname: "h".repeat(hostname),
        name: "n".repeat(name),
        version: "v".repeat(version),
        ..AgentInfo::default()
    }
}

#[parameterized(
    all_at_limit = { 255, 128, 64, None },
    hostname_over = { 256, 10, 10, Some("hostname exceeds maximum length") },
    name_over = { 10, 129, 10, Some("name exceeds maximum length") },
    version_over = { 10, 10, 65, Some("version exceeds maximum length") },
)]
fn field_length_limits(hostname: usize, name: usize, version: usize, expect: Option<&str>) {
    let result = validate_agent(&info_with(hostname, name, version));
    match expect {
        None => assert!(result.is_ok()),
        Some(message) => assert_eq!(result.unwrap_err(), message),
    }
}

#[test]
fn empty_info_is_valid() {
    assert!(validate_agent(&AgentInfo::default()).is_ok());
}
