//! Sliding Window Log rate limiting algorithm.
//!
//! The Sliding Window Log algorithm stores timestamps of all admitted requests
//! within the window, providing exact accuracy at the cost of `O(limit)` state
//! per key.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::algorithm::{Algorithm, DEFAULT_MAX_RETRIES, execute_atomic};
use crate::decision::{Decision, RateLimitInfo};
use crate::error::Result;
use crate::key::scoped_key;
use crate::quota::Quota;
use crate::state::{LimiterState, SlidingWindowState, decode_as};
use crate::storage::{Storage, StorageEntry};

const NAME: &str = "sliding_window";

/// Sliding Window Log rate limiting algorithm.
///
/// Admits a request only while fewer than `limit` requests were admitted in
/// the trailing `window`. Best for accuracy-critical applications.
pub struct SlidingWindowLogLimiter<S> {
    storage: Arc<S>,
    quota: Quota,
    max_retries: u32,
}

impl<S: Storage> SlidingWindowLogLimiter<S> {
    /// Create a limiter enforcing `quota` over `storage`.
    pub fn new(storage: Arc<S>, quota: Quota) -> Self {
        Self {
            storage,
            quota,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set how many write conflicts a single decision tolerates.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn step(&self, key: &str, current: Option<&[u8]>, now: u64) -> Result<(StorageEntry, Decision)> {
        let limit = self.quota.limit();
        let window_ms = self.quota.window_ms();

        let mut timestamps = match current.map(decode_as::<SlidingWindowState>) {
            None => Vec::new(),
            Some(Ok(state)) => state.timestamps,
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Resetting corrupted sliding window state");
                Vec::new()
            }
        };

        // Only requests strictly inside (now - window, now] still count.
        let cutoff = now.saturating_sub(window_ms);
        timestamps.retain(|&ts| ts > cutoff);
        timestamps.sort_unstable();
        let capacity = usize::try_from(limit).unwrap_or(usize::MAX);
        if timestamps.len() > capacity {
            let excess = timestamps.len() - capacity;
            timestamps.drain(..excess);
        }

        let expires_at = now.saturating_add(window_ms);
        let info = RateLimitInfo::new(limit, 0, expires_at).with_algorithm(NAME);

        let decision = if timestamps.len() >= capacity {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = oldest.saturating_add(window_ms).saturating_sub(now);
            debug!(key = %key, in_window = timestamps.len(), retry_after_ms = retry_after, "Request denied");
            Decision::denied(info.with_retry_after(Duration::from_millis(retry_after)))
        } else {
            timestamps.push(now);
            let remaining = limit.saturating_sub(timestamps.len() as u64);
            debug!(key = %key, remaining, "Request allowed");
            Decision::allowed(RateLimitInfo { remaining, ..info })
        };

        let value = LimiterState::SlidingWindow(SlidingWindowState { timestamps }).encode()?;
        Ok((StorageEntry::new(value, Some(expires_at)), decision))
    }
}

impl<S: Storage> Algorithm for SlidingWindowLogLimiter<S> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn quota(&self) -> &Quota {
        &self.quota
    }

    async fn allow(&self, key: &str, cancel: &CancellationToken) -> Result<Decision> {
        let storage_key = scoped_key(NAME, &self.quota, key);
        execute_atomic(
            self.storage.as_ref(),
            &storage_key,
            self.max_retries,
            cancel,
            |current, now| self.step(key, current, now),
        )
        .await
    }

    async fn reset(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let storage_key = scoped_key(NAME, &self.quota, key);
        self.storage.delete(&storage_key, cancel).await
    }
}

impl<S> fmt::Debug for SlidingWindowLogLimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLogLimiter")
            .field("quota", &self.quota)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<S> Clone for SlidingWindowLogLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            quota: self.quota,
            max_retries: self.max_retries,
        }
    }
}
