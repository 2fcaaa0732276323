//! Request admission engine for Rust services.
//!
//! `keel_ratelimit` decides whether a request identified by a caller key may
//! proceed, and keeps the per-key state needed to make that decision
//! consistently across calls and across instances sharing a store:
//!
//! - **Two Algorithms**: Token Bucket and Sliding Window Log
//! - **Pluggable Storage**: In-memory with expiration sweeping, Redis with connection pooling
//! - **Race-free Decisions**: Every read-modify-write is a compare-and-swap with retry
//! - **Cancellation**: Every operation honours a `CancellationToken`
//! - **Admission Service**: Request defaults, status mapping and denial events
//!
//! # Quick Start
//!
//! ```ignore
//! use keel_ratelimit::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let limiter = LimiterFactory::create(
//!         LimiterConfig::new("token_bucket", 10, Duration::from_secs(1)).with_storage(storage),
//!     )?;
//!
//!     let decision = limiter.allow("user:123", &CancellationToken::new()).await?;
//!     if decision.is_allowed() {
//!         println!("Request allowed! {} remaining", decision.info().remaining);
//!     } else {
//!         println!("Rate limited! Retry after {:?}", decision.info().retry_after);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Algorithms
//!
//! | Algorithm | Identifier | State per key | Behaviour |
//! |-----------|------------|---------------|-----------|
//! | Token Bucket | `token_bucket` | O(1) | Bursts up to `limit`, refills at `limit / window` |
//! | Sliding Window Log | `sliding_window` | O(limit) | Exactly `limit` per trailing window |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory storage with garbage collection
//! - `redis`: Redis storage backend
//! - `full`: Both backends

pub mod algorithm;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod factory;
pub mod key;
pub mod quota;
pub mod service;
pub mod state;
pub mod storage;

// Re-export main types
pub use algorithm::{Algorithm, AlgorithmKind, SlidingWindowLogLimiter, TokenBucketLimiter};
pub use config::{EventsConfig, LimiterDefaults, ServiceConfig, format_duration, parse_duration};
pub use decision::{Decision, RateLimitInfo};
pub use error::{ConfigError, ConnectionError, RateLimitError, Result, StorageError};
pub use events::{DenialEvent, EventPublisher};
pub use factory::{Limiter, LimiterConfig, LimiterFactory};
pub use key::scoped_key;
pub use quota::Quota;
pub use service::{AdmissionService, CheckRequest, CheckResponse};
pub use storage::{Storage, StorageEntry, current_timestamp_ms};

// Re-export storage types
#[cfg(any(feature = "memory", feature = "redis"))]
pub use storage::{AnyStorage, StorageConfig, StorageKind};

#[cfg(feature = "memory")]
pub use storage::{GcConfig, GcInterval, MemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::{Algorithm, AlgorithmKind};
    pub use crate::decision::{Decision, RateLimitInfo};
    pub use crate::error::{RateLimitError, Result};
    pub use crate::factory::{Limiter, LimiterConfig, LimiterFactory};
    pub use crate::quota::Quota;
    pub use crate::service::{AdmissionService, CheckRequest, CheckResponse};
    pub use crate::storage::Storage;

    #[cfg(feature = "memory")]
    pub use crate::storage::{GcConfig, GcInterval, MemoryStorage};
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_token_bucket() {
        use crate::prelude::*;
        use std::sync::Arc;
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        let storage = Arc::new(MemoryStorage::new());
        let limiter = LimiterFactory::create(
            LimiterConfig::new("token_bucket", 10, Duration::from_secs(60)).with_storage(storage),
        )
        .unwrap();

        let decision = limiter.allow("user:1", &CancellationToken::new()).await.unwrap();

        assert!(decision.is_allowed());
        assert_eq!(decision.info().remaining, 9);
        assert_eq!(decision.info().algorithm, Some("token_bucket"));
    }

    #[cfg(feature = "memory")]
    #[tokio::test]
    async fn test_integration_service_defaults() {
        use crate::prelude::*;
        use crate::config::LimiterDefaults;
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        let service = AdmissionService::new(Arc::new(MemoryStorage::new()), LimiterDefaults::default());
        let response = service
            .check(CheckRequest::new("user:1"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.allowed);
        assert_eq!(response.remaining, Some(99));
        assert_eq!(response.status_code(), 200);
    }
}
