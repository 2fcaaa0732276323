//! Limiter construction.
//!
//! [`LimiterFactory`] validates a [`LimiterConfig`] and returns a ready
//! [`Limiter`] bound to the configured storage. Validation never falls back
//! to defaults: a bad limit, window, storage or algorithm name is an error.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use keel_ratelimit::{LimiterConfig, LimiterFactory, MemoryStorage};
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let limiter = LimiterFactory::create(
//!     LimiterConfig::new("sliding_window", 10, Duration::from_secs(60)).with_storage(storage),
//! )?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::algorithm::{
    Algorithm, AlgorithmKind, DEFAULT_MAX_RETRIES, SlidingWindowLogLimiter, TokenBucketLimiter,
};
use crate::decision::Decision;
use crate::error::{ConfigError, Result};
use crate::quota::Quota;
use crate::storage::Storage;

/// Parameters for building a limiter.
pub struct LimiterConfig<S> {
    /// Algorithm identifier (`token_bucket` or `sliding_window`).
    pub algorithm: String,
    /// Maximum admitted requests per window.
    pub limit: u64,
    /// Trailing window length.
    pub window: Duration,
    /// Backend holding per-key state.
    pub storage: Option<Arc<S>>,
    /// Write conflicts tolerated per decision.
    pub max_retries: u32,
}

impl<S> LimiterConfig<S> {
    /// Create a configuration without storage attached.
    pub fn new(algorithm: impl Into<String>, limit: u64, window: Duration) -> Self {
        Self {
            algorithm: algorithm.into(),
            limit,
            window,
            storage: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Attach the storage backend.
    pub fn with_storage(mut self, storage: Arc<S>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set how many write conflicts a single decision tolerates.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Builds limiters from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimiterFactory;

impl LimiterFactory {
    /// Validate `config` and build the limiter it describes.
    ///
    /// Checks run in order: storage present, limit positive, window positive,
    /// algorithm known.
    pub fn create<S: Storage>(config: LimiterConfig<S>) -> Result<Limiter<S>> {
        let storage = config.storage.ok_or(ConfigError::MissingStorage)?;
        let quota = Quota::try_new(config.limit, config.window)?;
        let kind: AlgorithmKind = config.algorithm.parse()?;

        Ok(match kind {
            AlgorithmKind::TokenBucket => Limiter::TokenBucket(
                TokenBucketLimiter::new(storage, quota).with_max_retries(config.max_retries),
            ),
            AlgorithmKind::SlidingWindow => Limiter::SlidingWindow(
                SlidingWindowLogLimiter::new(storage, quota).with_max_retries(config.max_retries),
            ),
        })
    }
}

/// A limiter of either algorithm.
pub enum Limiter<S> {
    /// Token bucket.
    TokenBucket(TokenBucketLimiter<S>),
    /// Sliding window log.
    SlidingWindow(SlidingWindowLogLimiter<S>),
}

impl<S> fmt::Debug for Limiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenBucket(limiter) => fmt::Debug::fmt(limiter, f),
            Self::SlidingWindow(limiter) => fmt::Debug::fmt(limiter, f),
        }
    }
}

impl<S> Clone for Limiter<S> {
    fn clone(&self) -> Self {
        match self {
            Self::TokenBucket(limiter) => Self::TokenBucket(limiter.clone()),
            Self::SlidingWindow(limiter) => Self::SlidingWindow(limiter.clone()),
        }
    }
}

impl<S: Storage> Limiter<S> {
    /// Which algorithm this limiter runs.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Self::TokenBucket(_) => AlgorithmKind::TokenBucket,
            Self::SlidingWindow(_) => AlgorithmKind::SlidingWindow,
        }
    }
}

impl<S: Storage> Algorithm for Limiter<S> {
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn quota(&self) -> &Quota {
        match self {
            Self::TokenBucket(limiter) => limiter.quota(),
            Self::SlidingWindow(limiter) => limiter.quota(),
        }
    }

    async fn allow(&self, key: &str, cancel: &CancellationToken) -> Result<Decision> {
        match self {
            Self::TokenBucket(limiter) => limiter.allow(key, cancel).await,
            Self::SlidingWindow(limiter) => limiter.allow(key, cancel).await,
        }
    }

    async fn reset(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        match self {
            Self::TokenBucket(limiter) => limiter.reset(key, cancel).await,
            Self::SlidingWindow(limiter) => limiter.reset(key, cancel).await,
        }
    }
}
