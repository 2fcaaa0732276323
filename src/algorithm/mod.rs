//! Rate limiting algorithm trait and implementations.
//!
//! This module defines the `Algorithm` trait and provides the two admission
//! algorithms, each bound to a storage backend and a [`Quota`].
//!
//! # Available Algorithms
//!
//! - **Token Bucket** (`token_bucket`): Controlled bursts with refilling tokens
//! - **Sliding Window Log** (`sliding_window`): Exact, stores one timestamp per admitted request

mod sliding_log;
mod token_bucket;

pub use sliding_log::SlidingWindowLogLimiter;
pub use token_bucket::TokenBucketLimiter;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::decision::Decision;
use crate::error::{RateLimitError, Result, StorageError};
use crate::quota::Quota;
use crate::storage::{Storage, StorageEntry, current_timestamp_ms, ensure_active};

/// Default number of conflicting writes tolerated before a decision gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Rate limiting algorithm trait.
///
/// Each algorithm provides different trade-offs between accuracy, memory usage,
/// and burst handling. All implementations must be thread-safe.
///
/// # Algorithm Comparison
///
/// | Algorithm | Accuracy | Memory | Burst | Best For |
/// |-----------|----------|--------|-------|----------|
/// | Token Bucket | High | O(1) | Excellent | Bursty traffic |
/// | Sliding Window Log | Exact | O(limit) | Good | Precision critical |
pub trait Algorithm: Send + Sync {
    /// Get the algorithm name (for logging/metrics).
    fn name(&self) -> &'static str;

    /// The quota this limiter enforces.
    fn quota(&self) -> &Quota;

    /// Decide whether a request for `key` is admitted, and record it.
    ///
    /// A denial is `Ok` with [`Decision::is_denied`]; an `Err` means the
    /// decision could not be made and must not be read as a denial.
    fn allow(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Forget all state recorded for `key`.
    fn reset(&self, key: &str, cancel: &CancellationToken)
    -> impl Future<Output = Result<()>> + Send;
}

/// Algorithm identifier as used in configuration and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// [`TokenBucketLimiter`].
    #[default]
    TokenBucket,
    /// [`SlidingWindowLogLimiter`].
    SlidingWindow,
}

impl AlgorithmKind {
    /// Identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenBucket => "token_bucket",
            Self::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token_bucket" => Ok(Self::TokenBucket),
            "sliding_window" => Ok(Self::SlidingWindow),
            other => Err(RateLimitError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Execute an atomic read-modify-write against `key`.
///
/// `operation` receives the current raw value (if any) and the current time
/// in Unix milliseconds, and returns the entry to store together with the
/// caller's result. The entry is written with a compare-and-swap against the
/// value that was read; on conflict the whole cycle runs again with fresh
/// state, at most `max_retries` extra times.
///
/// Cancellation is checked before every read and again before every write,
/// so nothing is written once the token has fired.
pub(crate) async fn execute_atomic<S, F, T>(
    storage: &S,
    key: &str,
    max_retries: u32,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    S: Storage + ?Sized,
    F: FnMut(Option<&[u8]>, u64) -> Result<(StorageEntry, T)> + Send,
    T: Send,
{
    let mut conflicts = 0u32;
    loop {
        ensure_active(cancel)?;
        let current = storage.get(key, cancel).await?;
        let now = current_timestamp_ms();

        let (entry, result) = operation(current.as_deref(), now)?;

        ensure_active(cancel)?;
        if storage
            .compare_and_swap(key, current.as_deref(), entry, cancel)
            .await?
        {
            return Ok(result);
        }

        conflicts += 1;
        if conflicts > max_retries {
            warn!(key = %key, attempts = conflicts, "Gave up after repeated write conflicts");
            return Err(StorageError::AtomicConflict {
                attempts: conflicts,
            }
            .into());
        }
        tokio::task::yield_now().await;
    }
}
