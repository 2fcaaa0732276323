//! Quota configuration for rate limiting.
//!
//! A `Quota` defines the rate limiting parameters: how many requests are
//! allowed over what trailing time window.
//!
//! # Examples
//!
//! ```ignore
//! use keel_ratelimit::Quota;
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let quota = Quota::per_minute(100);
//!
//! // Custom: 50 requests per 30 seconds, validated
//! let quota = Quota::try_new(50, Duration::from_secs(30))?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Rate limiting quota configuration.
///
/// Windows are tracked at millisecond resolution, so a valid window is at
/// least one millisecond long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quota {
    /// Maximum number of requests in the window (bucket capacity).
    limit: u64,

    /// Time window duration.
    window: Duration,
}

impl Quota {
    /// Create a new quota with the given limit and window.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0 or `window` is shorter than a millisecond.
    /// Use [`Quota::try_new`] for untrusted input.
    pub fn new(limit: u64, window: Duration) -> Self {
        assert!(limit > 0, "limit must be greater than 0");
        assert!(window.as_millis() > 0, "window must be at least 1ms");

        Self { limit, window }
    }

    /// Try to create a new quota, returning an error if invalid.
    pub fn try_new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(ConfigError::InvalidLimit(limit).into());
        }
        if window.as_millis() == 0 {
            return Err(ConfigError::InvalidWindow(window).into());
        }
        Ok(Self { limit, window })
    }

    /// Create a quota allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Create a quota allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Create a quota allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Get the maximum requests allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in whole milliseconds.
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.limit as f64 / self.window.as_secs_f64()
    }

    /// Time needed to refill a single token.
    pub fn refill_interval(&self) -> Duration {
        self.window / u32::try_from(self.limit).unwrap_or(u32::MAX)
    }

    /// Whole tokens earned over `elapsed_ms`, truncated.
    ///
    /// Computed as `floor(elapsed_ms * limit / window_ms)` in integer
    /// arithmetic so no fractional credit is ever rounded up.
    pub fn tokens_for(&self, elapsed_ms: u64) -> u64 {
        let earned = u128::from(elapsed_ms) * u128::from(self.limit) / u128::from(self.window_ms());
        u64::try_from(earned).unwrap_or(u64::MAX)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::per_minute(100)
    }
}
