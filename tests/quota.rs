//! Integration tests for quota configuration.

use keel_ratelimit::{ConfigError, Quota, RateLimitError, parse_duration};
use std::time::Duration;

#[test]
fn test_quota_per_second() {
    let quota = Quota::per_second(10);
    assert_eq!(quota.limit(), 10);
    assert_eq!(quota.window(), Duration::from_secs(1));
    assert_eq!(quota.refill_interval(), Duration::from_millis(100));
}

#[test]
fn test_quota_per_minute() {
    let quota = Quota::per_minute(60);
    assert_eq!(quota.limit(), 60);
    assert_eq!(quota.window(), Duration::from_secs(60));
    assert_eq!(quota.refill_interval(), Duration::from_secs(1));
}

#[test]
fn test_quota_custom_window() {
    let quota = Quota::new(100, Duration::from_secs(300)); // 100 per 5 minutes
    assert_eq!(quota.limit(), 100);
    assert_eq!(quota.window_ms(), 300_000);
}

#[test]
fn test_quota_from_duration_string() {
    let quota = Quota::try_new(50, parse_duration("1m30s").unwrap()).unwrap();
    assert_eq!(quota.window(), Duration::from_secs(90));
}

#[test]
fn test_quota_validation_errors() {
    assert!(matches!(
        Quota::try_new(0, Duration::from_secs(1)),
        Err(RateLimitError::Config(ConfigError::InvalidLimit(0)))
    ));
    assert!(matches!(
        Quota::try_new(1, Duration::ZERO),
        Err(RateLimitError::Config(ConfigError::InvalidWindow(_)))
    ));
}
