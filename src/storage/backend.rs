//! Startup-time backend selection.
//!
//! The backend is chosen once from configuration (`"memory"` or `"redis"`)
//! and handed to the limiters as an already-constructed [`AnyStorage`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ConfigError, Result};
#[cfg(feature = "memory")]
use crate::storage::{GcConfig, MemoryStorage};
#[cfg(feature = "redis")]
use crate::storage::{RedisConfig, RedisStorage};
use crate::storage::{Storage, StorageEntry};

/// Storage backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// In-process map, single instance only.
    #[default]
    Memory,
    /// Shared Redis, safe across instances.
    Redis,
}

impl StorageKind {
    /// Configuration name of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidStorage(format!(
                "unsupported storage type: {other}"
            ))),
        }
    }
}

/// Storage selection and backend-specific parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend to build.
    pub backend: StorageKind,
    /// Interval of the in-memory expiration sweep; zero disables it.
    #[serde(with = "crate::config::duration_str")]
    pub sweep_interval: Duration,
    /// Redis connection parameters.
    #[cfg(feature = "redis")]
    pub redis: RedisConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Memory,
            sweep_interval: Duration::from_secs(60),
            #[cfg(feature = "redis")]
            redis: RedisConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Configuration for the in-memory backend.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Configuration for the Redis backend.
    #[cfg(feature = "redis")]
    pub fn redis(redis: RedisConfig) -> Self {
        Self {
            backend: StorageKind::Redis,
            redis,
            ..Self::default()
        }
    }

    /// Set the in-memory sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the configured backend.
    pub async fn build(self) -> Result<AnyStorage> {
        info!(backend = %self.backend, "Initialising storage backend");
        match self.backend {
            StorageKind::Memory => self.build_memory(),
            StorageKind::Redis => self.build_redis().await,
        }
    }

    #[cfg(feature = "memory")]
    fn build_memory(&self) -> Result<AnyStorage> {
        let gc = if self.sweep_interval.is_zero() {
            GcConfig::manual()
        } else {
            GcConfig::on_duration(self.sweep_interval)
        };
        Ok(AnyStorage::Memory(MemoryStorage::with_gc(gc)))
    }

    #[cfg(not(feature = "memory"))]
    fn build_memory(&self) -> Result<AnyStorage> {
        Err(ConfigError::InvalidStorage("memory backend not compiled in".into()).into())
    }

    #[cfg(feature = "redis")]
    async fn build_redis(self) -> Result<AnyStorage> {
        Ok(AnyStorage::Redis(RedisStorage::new(self.redis).await?))
    }

    #[cfg(not(feature = "redis"))]
    async fn build_redis(self) -> Result<AnyStorage> {
        Err(ConfigError::InvalidStorage("redis backend not compiled in".into()).into())
    }
}

/// A storage backend selected at runtime.
#[derive(Debug)]
pub enum AnyStorage {
    /// In-process storage.
    #[cfg(feature = "memory")]
    Memory(MemoryStorage),
    /// Shared Redis storage.
    #[cfg(feature = "redis")]
    Redis(RedisStorage),
}

impl AnyStorage {
    /// Which backend this is.
    pub fn kind(&self) -> StorageKind {
        match self {
            #[cfg(feature = "memory")]
            Self::Memory(_) => StorageKind::Memory,
            #[cfg(feature = "redis")]
            Self::Redis(_) => StorageKind::Redis,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "memory")]
            AnyStorage::Memory($inner) => $call,
            #[cfg(feature = "redis")]
            AnyStorage::Redis($inner) => $call,
        }
    };
}

impl Storage for AnyStorage {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        dispatch!(self, inner => inner.get(key, cancel).await)
    }

    async fn set(&self, key: &str, entry: StorageEntry, cancel: &CancellationToken) -> Result<()> {
        dispatch!(self, inner => inner.set(key, entry, cancel).await)
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        dispatch!(self, inner => inner.delete(key, cancel).await)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        dispatch!(self, inner => inner.compare_and_swap(key, expected, new, cancel).await)
    }

    async fn close(&self) -> Result<()> {
        dispatch!(self, inner => inner.close().await)
    }
}
