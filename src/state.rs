//! Per-key limiter state and its storage encoding.
//!
//! Each algorithm owns one state type. On the wire both are wrapped in the
//! tagged [`LimiterState`] enum and encoded as JSON, so a blob written by one
//! algorithm is never misread as the other's.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, StorageError};

/// A state blob that could not be decoded.
///
/// Never surfaced to callers: limiters log it and start the key afresh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("corrupted limiter state: {0}")]
pub struct CorruptedState(pub String);

/// Token bucket state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Remaining admission credits.
    pub tokens: u64,
    /// Reference instant for refill (Unix milliseconds).
    pub last_refill_ms: u64,
}

impl TokenBucketState {
    /// A full bucket.
    pub fn full(limit: u64, now_ms: u64) -> Self {
        Self {
            tokens: limit,
            last_refill_ms: now_ms,
        }
    }
}

/// Sliding window log state: admitted request instants, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    /// Unix milliseconds of each admitted request still of interest.
    pub timestamps: Vec<u64>,
}

/// Tagged state as persisted in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterState {
    /// Token bucket state.
    TokenBucket(TokenBucketState),
    /// Sliding window log state.
    SlidingWindow(SlidingWindowState),
}

impl LimiterState {
    /// Encode for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()).into())
    }

    /// Decode a stored blob.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CorruptedState> {
        serde_json::from_slice(bytes).map_err(|e| CorruptedState(e.to_string()))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::TokenBucket(_) => "token_bucket",
            Self::SlidingWindow(_) => "sliding_window",
        }
    }
}

impl TryFrom<LimiterState> for TokenBucketState {
    type Error = CorruptedState;

    fn try_from(state: LimiterState) -> std::result::Result<Self, Self::Error> {
        match state {
            LimiterState::TokenBucket(bucket) => Ok(bucket),
            other => Err(CorruptedState(format!(
                "expected token_bucket state, found {}",
                other.kind()
            ))),
        }
    }
}

impl TryFrom<LimiterState> for SlidingWindowState {
    type Error = CorruptedState;

    fn try_from(state: LimiterState) -> std::result::Result<Self, Self::Error> {
        match state {
            LimiterState::SlidingWindow(window) => Ok(window),
            other => Err(CorruptedState(format!(
                "expected sliding_window state, found {}",
                other.kind()
            ))),
        }
    }
}

/// Decode a blob into one algorithm's state.
pub fn decode_as<T>(bytes: &[u8]) -> std::result::Result<T, CorruptedState>
where
    T: TryFrom<LimiterState, Error = CorruptedState>,
{
    LimiterState::decode(bytes).and_then(T::try_from)
}
