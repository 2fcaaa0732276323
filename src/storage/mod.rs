//! Storage backend trait and implementations.
//!
//! This module defines the `Storage` trait that all storage backends must implement,
//! along with built-in implementations for in-memory and Redis storage and the
//! [`AnyStorage`] selector used to pick one at startup.

#[cfg(any(feature = "memory", feature = "redis"))]
mod backend;
mod entry;
#[cfg(feature = "memory")]
mod memory_gc;
#[cfg(feature = "redis")]
mod redis_cluster;

#[cfg(any(feature = "memory", feature = "redis"))]
pub use backend::{AnyStorage, StorageConfig, StorageKind};
pub use entry::StorageEntry;

#[cfg(feature = "memory")]
pub use memory_gc::{GcConfig, GcInterval, MemoryStorage};

// RedisStorage with connection pooling
#[cfg(feature = "redis")]
pub use redis_cluster::{RedisConfig, RedisStorage};

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{RateLimitError, Result};

/// Storage backend trait for rate limiting state.
///
/// Values are opaque byte blobs; the backend owns expiration but no rate
/// limiting semantics. All operations are async to support both local and
/// distributed backends, and every operation takes the caller's cancellation
/// token: if it has already fired the operation fails with
/// [`RateLimitError::Cancelled`] without touching the backend.
///
/// # Required Operations
///
/// - `get`: Retrieve a live value by key
/// - `set`: Upsert a value with an optional absolute expiration
/// - `delete`: Remove an entry
/// - `compare_and_swap`: Conditionally replace a value
/// - `close`: Release backend resources
///
/// # Example
///
/// ```ignore
/// use keel_ratelimit::storage::{MemoryStorage, Storage, StorageEntry};
/// use tokio_util::sync::CancellationToken;
///
/// let storage = MemoryStorage::new();
/// let cancel = CancellationToken::new();
///
/// storage.set("key", StorageEntry::persistent("v"), &cancel).await?;
/// assert_eq!(storage.get("key", &cancel).await?, Some(b"v".to_vec()));
/// ```
pub trait Storage: Send + Sync + 'static {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. A missing key
    /// is never an error.
    fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Upsert an entry.
    ///
    /// An entry without `expires_at` never expires.
    fn set(
        &self,
        key: &str,
        entry: StorageEntry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete an entry.
    ///
    /// Returns success even if the key didn't exist.
    fn delete(&self, key: &str, cancel: &CancellationToken)
    -> impl Future<Output = Result<()>> + Send;

    /// Compare-and-swap operation.
    ///
    /// If the current live value equals `expected` (`None` meaning "absent or
    /// expired"), it is replaced with `new` and `true` is returned. The
    /// comparison and the write happen atomically with respect to every other
    /// operation on the same key.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Release backend resources.
    ///
    /// Calling it more than once is a no-op.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        (**self).get(key, cancel).await
    }

    async fn set(&self, key: &str, entry: StorageEntry, cancel: &CancellationToken) -> Result<()> {
        (**self).set(key, entry, cancel).await
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        (**self).delete(key, cancel).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new, cancel).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        (**self).get(key, cancel).await
    }

    async fn set(&self, key: &str, entry: StorageEntry, cancel: &CancellationToken) -> Result<()> {
        (**self).set(key, entry, cancel).await
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        (**self).delete(key, cancel).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        (**self).compare_and_swap(key, expected, new, cancel).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Fail fast with [`RateLimitError::Cancelled`] if the token already fired.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RateLimitError::Cancelled)
    } else {
        Ok(())
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// A clock set before the epoch reads as 0.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
