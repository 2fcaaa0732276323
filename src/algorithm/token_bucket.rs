//! Token Bucket rate limiting algorithm.

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
use crate::state::{LimiterState, TokenBucketState, decode_as};
use crate::storage::{Storage, StorageEntry};

const NAME: &str = "token_bucket";

/// Token Bucket rate limiting algorithm.
///
/// Allows controlled bursts while enforcing an average rate limit. The bucket
/// holds up to `limit` tokens and earns whole tokens at `limit / window`;
/// every admitted request spends one.
///
/// When a request spends the last token the refill clock restarts at that
/// instant, so time a key spent idle with a partly used bucket never turns
/// into a backlog of credit.
pub struct TokenBucketLimiter<S> {
    storage: Arc<S>,
    quota: Quota,
    max_retries: u32,
}

impl<S: Storage> TokenBucketLimiter<S> {
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

    /// Apply one request to the stored state.
    fn step(&self, key: &str, current: Option<&[u8]>, now: u64) -> Result<(StorageEntry, Decision)> {
        let limit = self.quota.limit();

        let mut state = match current.map(decode_as::<TokenBucketState>) {
            None => {
                debug!(key = %key, limit, "Initialising token bucket");
                TokenBucketState::full(limit, now)
            }
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Resetting corrupted token bucket state");
                TokenBucketState::full(limit, now)
            }
        };
        state.tokens = state.tokens.min(limit);

        if now > state.last_refill_ms {
            let earned = self.quota.tokens_for(now - state.last_refill_ms);
            if earned > 0 {
                state.tokens = state.tokens.saturating_add(earned).min(limit);
                state.last_refill_ms = now;
                debug!(key = %key, earned, tokens = state.tokens, "Refilled token bucket");
            }
        }

        let window_ms = self.quota.window_ms();
        let expires_at = now.saturating_add(window_ms);
        let info = RateLimitInfo::new(limit, 0, expires_at).with_algorithm(NAME);

        let decision = if state.tokens == 0 {
            let retry_after = self.next_token_at(&state).saturating_sub(now);
            debug!(key = %key, retry_after_ms = retry_after, "Request denied");
            Decision::denied(info.with_retry_after(Duration::from_millis(retry_after)))
        } else {
            state.tokens -= 1;
            if state.tokens == 0 {
                state.last_refill_ms = now;
            }
            debug!(key = %key, remaining = state.tokens, "Request allowed");
            Decision::allowed(RateLimitInfo {
                remaining: state.tokens,
                ..info
            })
        };

        let value = LimiterState::TokenBucket(state).encode()?;
        Ok((StorageEntry::new(value, Some(expires_at)), decision))
    }

    /// Instant at which the bucket next holds a whole token.
    fn next_token_at(&self, state: &TokenBucketState) -> u64 {
        let window_ms = self.quota.window_ms();
        let per_token = window_ms.div_ceil(self.quota.limit()).max(1);
        state.last_refill_ms.saturating_add(per_token)
    }
}

impl<S: Storage> Algorithm for TokenBucketLimiter<S> {
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

impl<S> fmt::Debug for TokenBucketLimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("quota", &self.quota)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<S> Clone for TokenBucketLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            quota: self.quota,
            max_retries: self.max_retries,
        }
    }
}
