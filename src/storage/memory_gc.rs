//! In-memory storage with automatic garbage collection.
//!
//! This storage backend uses `DashMap` for thread-safe concurrent access
//! and includes a configurable sweep that drops expired entries, so keys that
//! are never read again do not accumulate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::storage::{Storage, StorageEntry, current_timestamp_ms, ensure_active};

/// Garbage collection interval configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcInterval {
    /// Sweep from a background task at fixed time intervals.
    Duration(Duration),
    /// Sweep inline every N storage operations.
    Requests(u64),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Duration(Duration::from_secs(60))
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count.max(1)),
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// In-memory storage with garbage collection.
///
/// Expired entries are invisible to reads as soon as their expiration
/// passes; the sweep only reclaims their memory. Compare-and-swap runs under
/// the map's per-entry lock, which is what makes concurrent decisions on one
/// key safe inside a single process.
///
/// A time-based sweep needs a Tokio runtime at construction time. Without one
/// the storage still works but only sweeps on [`MemoryStorage::run_gc`].
///
/// # Example
///
/// ```ignore
/// use keel_ratelimit::storage::{MemoryStorage, GcConfig};
/// use std::time::Duration;
///
/// // Default GC (every 60 seconds)
/// let storage = MemoryStorage::new();
///
/// // Custom GC interval
/// let storage = MemoryStorage::with_gc(GcConfig::on_duration(Duration::from_secs(5)));
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.run_gc();
/// ```
pub struct MemoryStorage {
    data: Arc<DashMap<String, StorageEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: CancellationToken,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new memory storage with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new memory storage with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let storage = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            gc_task: Mutex::new(None),
        };

        // Start background GC task if duration-based
        if let GcInterval::Duration(interval) = gc_config.interval {
            *storage.gc_task.lock() = storage.start_gc_task(interval);
        }

        storage
    }

    /// Start background GC task.
    fn start_gc_task(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available, background sweep disabled");
            return None;
        };

        let data = Arc::clone(&self.data);
        let shutdown = self.shutdown.clone();
        let period = interval.max(Duration::from_millis(1));

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep_expired(&data, current_timestamp_ms());
                        if removed > 0 {
                            debug!(removed, remaining = data.len(), "Swept expired entries");
                        }
                    }
                }
            }
        }))
    }

    /// Manually trigger garbage collection.
    ///
    /// Returns the number of entries removed.
    pub fn run_gc(&self) -> usize {
        sweep_expired(&self.data, current_timestamp_ms())
    }

    /// Get the number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            // Hand-built configs may carry zero; treat it as every call.
            let threshold = threshold.max(1);
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if count % threshold == 0 && count > 0 {
                // Try to acquire GC lock (non-blocking)
                if let Some(_guard) = self.gc_lock.try_lock() {
                    sweep_expired(&self.data, current_timestamp_ms());
                }
            }
        }
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Remove every entry that is expired at `now`.
///
/// Expired keys are collected first and then removed one by one, so the
/// sweep only holds a write lock for the single entry it is deleting and
/// re-checks expiry under that lock in case the key was rewritten meanwhile.
fn sweep_expired(data: &DashMap<String, StorageEntry>, now: u64) -> usize {
    let expired: Vec<String> = data
        .iter()
        .filter(|item| item.value().is_expired(now))
        .map(|item| item.key().clone())
        .collect();

    expired
        .iter()
        .filter(|key| data.remove_if(key.as_str(), |_, entry| entry.is_expired(now)).is_some())
        .count()
}

impl Storage for MemoryStorage {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        ensure_active(cancel)?;
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
            // Entry expired, remove it
            drop(entry);
            self.data.remove_if(key, |_, entry| entry.is_expired(now));
            debug!(key, "Expired entry removed on read");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, entry: StorageEntry, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.maybe_run_gc();

        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;

        self.data.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        ensure_active(cancel)?;
        self.maybe_run_gc();

        let now = current_timestamp_ms();

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let matches = {
                    let current = occupied.get();
                    let live = (!current.is_expired(now)).then_some(current.value.as_slice());
                    live == expected
                };
                if !matches {
                    return Ok(false);
                }
                occupied.insert(new);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(new);
                Ok(true)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let task = self.gc_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Sweep task failed");
                }
            }
            info!("Memory storage closed");
        }
        Ok(())
    }
}
