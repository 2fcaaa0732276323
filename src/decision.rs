//! Decision types for rate limiting results.
//!
//! When a rate limit check is performed, the result is a `Decision` that indicates
//! whether the request is allowed or denied, along with metadata about the current
//! rate limit state.

use std::time::Duration;

/// The result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Rate limit information.
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }
}

/// Information about the current rate limit state.
///
/// Instants are wall-clock Unix milliseconds so they stay meaningful when the
/// state lives in a store shared by several processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: u64,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// When the limiter's stored state for the key lapses (Unix milliseconds).
    pub reset_at_ms: u64,
    /// How long to wait before retrying (only set when rate limited).
    pub retry_after: Option<Duration>,
    /// Name of the algorithm that made this decision.
    pub algorithm: Option<&'static str>,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(limit: u64, remaining: u64, reset_at_ms: u64) -> Self {
        Self {
            limit,
            remaining,
            reset_at_ms,
            retry_after: None,
            algorithm: None,
        }
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Set the algorithm name.
    pub fn with_algorithm(mut self, name: &'static str) -> Self {
        self.algorithm = Some(name);
        self
    }

    /// Reset instant as a Unix timestamp in whole seconds.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms / 1000
    }

    /// Time left until reset, measured from `now_ms`.
    pub fn time_until_reset(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset_at_ms.saturating_sub(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_allowed() {
        let info = RateLimitInfo::new(100, 99, 60_000);
        let decision = Decision::allowed(info);

        assert!(decision.is_allowed());
        assert!(!decision.is_denied());
        assert_eq!(decision.info().limit, 100);
        assert_eq!(decision.info().remaining, 99);
    }

    #[test]
    fn test_decision_denied() {
        let info = RateLimitInfo::new(100, 0, 60_000).with_retry_after(Duration::from_secs(30));
        let decision = Decision::denied(info);

        assert!(decision.is_denied());
        assert!(!decision.is_allowed());
        assert_eq!(decision.info().remaining, 0);
        assert_eq!(decision.info().retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_reset_conversions() {
        let info = RateLimitInfo::new(5, 4, 1_700_000_001_999).with_algorithm("token_bucket");

        assert_eq!(info.reset_at_secs(), 1_700_000_001);
        assert_eq!(
            info.time_until_reset(1_700_000_001_000),
            Duration::from_millis(999)
        );
        assert_eq!(info.time_until_reset(u64::MAX), Duration::ZERO);
        assert_eq!(info.algorithm, Some("token_bucket"));
    }
}
