//! Redis storage backend for distributed rate limiting.
//!
//! Uses connection pooling for high performance. Conditional writes run as a
//! Lua script on the server so that several service instances sharing one
//! Redis never lose updates to each other.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::{
    Config, Connection, Pool, PoolConfig, PoolError, Runtime,
    redis::{AsyncCommands, RedisError, cmd},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ConnectionError, RateLimitError, Result, StorageError};
use crate::storage::{Storage, StorageEntry, current_timestamp_ms, ensure_active};

/// Atomically replace `KEYS[1]` when its value matches the expectation.
///
/// `ARGV[1]` is `"1"` when a value is expected and `"0"` when the key must be
/// absent, `ARGV[2]` the expected value, `ARGV[3]` the new value and `ARGV[4]`
/// the TTL in milliseconds (`0` for no expiration).
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
if tonumber(ARGV[4]) > 0 then
  redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
else
  redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

/// Redis storage configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis address as `host:port`.
    pub address: String,
    /// Optional password.
    pub password: Option<String>,
    /// Database index.
    pub db: i64,
    /// Key prefix for rate limit keys
    pub key_prefix: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Timeout for establishing a new connection
    #[serde(with = "crate::config::duration_str")]
    pub connection_timeout: Duration,
    /// How long to wait for a free pooled connection
    #[serde(with = "crate::config::duration_str")]
    pub wait_timeout: Duration,
    /// Timeout for a single command
    #[serde(with = "crate::config::duration_str")]
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: None,
            db: 0,
            key_prefix: "rl:".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(3),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database index.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set how long to wait for a free pooled connection.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Build the connection URL, including credentials and database.
    pub fn url(&self) -> String {
        let address = self
            .address
            .trim_start_matches("redis://")
            .trim_end_matches('/');
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}/{}", password, address, self.db)
            }
            _ => format!("redis://{}/{}", address, self.db),
        }
    }
}

/// Redis storage backend for distributed rate limiting.
///
/// Uses connection pooling for high performance.
///
/// # Example
///
/// ```ignore
/// use keel_ratelimit::storage::{RedisStorage, RedisConfig};
///
/// let config = RedisConfig::new("localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let storage = RedisStorage::new(config).await?;
/// ```
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisStorage {
    /// Create a new Redis storage from configuration.
    ///
    /// Pings the server once so misconfiguration fails at startup.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(config.url());
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = Some(config.wait_timeout);
        pool_config.timeouts.create = Some(config.connection_timeout);
        pool_config.timeouts.recycle = Some(config.connection_timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let ping = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
            cmd("PING")
                .query_async::<()>(&mut *conn)
                .await
                .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))
        };
        match tokio::time::timeout(config.connection_timeout, ping).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(address = %config.address, error = %e, "Failed to connect to Redis");
                return Err(e.into());
            }
            Err(_) => {
                error!(address = %config.address, "Timed out connecting to Redis");
                return Err(ConnectionError::Timeout(config.connection_timeout).into());
            }
        }

        info!(address = %config.address, db = config.db, "Connected to Redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            command_timeout: config.command_timeout,
        })
    }

    /// Create a new Redis storage from an address.
    pub async fn from_address(address: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(address)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => StorageError::PoolExhausted.into(),
            other => StorageError::unavailable(other.to_string(), true).into(),
        })
    }

    /// Take a pooled connection, giving up when the caller cancels.
    ///
    /// The wait is bounded by the pool's own wait timeout and not by the
    /// command timeout, so a saturated pool reports `PoolExhausted`.
    async fn connection(&self, cancel: &CancellationToken) -> Result<Connection> {
        ensure_active(cancel)?;
        tokio::select! {
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            conn = self.get_conn() => conn,
        }
    }

    /// Run a read under the command timeout. Cancellation abandons it.
    async fn read<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            outcome = tokio::time::timeout(self.command_timeout, op) => {
                outcome.map_err(|_| StorageError::Timeout(self.command_timeout))?
            }
        }
    }

    /// Run a write under the command timeout.
    ///
    /// Cancellation is honoured only until the command is dispatched, so
    /// `Cancelled` always means nothing was written. A command timeout does
    /// not carry that guarantee: the server may still apply the write.
    async fn write<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        ensure_active(cancel)?;
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| StorageError::Timeout(self.command_timeout))?
    }
}

fn command_failed(e: RedisError) -> RateLimitError {
    StorageError::unavailable(e.to_string(), true).into()
}

impl Storage for RedisStorage {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        let mut conn = self.connection(cancel).await?;
        self.read(cancel, async {
            conn.get::<_, Option<Vec<u8>>>(&full_key)
                .await
                .map_err(command_failed)
        })
        .await
    }

    async fn set(&self, key: &str, entry: StorageEntry, cancel: &CancellationToken) -> Result<()> {
        let full_key = self.full_key(key);
        let mut conn = self.connection(cancel).await?;
        self.write(cancel, async {
            match entry.ttl_ms(current_timestamp_ms()) {
                Some(ttl) => conn
                    .pset_ex::<_, _, ()>(&full_key, entry.value, ttl.max(1))
                    .await
                    .map_err(command_failed),
                None => conn
                    .set::<_, _, ()>(&full_key, entry.value)
                    .await
                    .map_err(command_failed),
            }
        })
        .await
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let full_key = self.full_key(key);
        let mut conn = self.connection(cancel).await?;
        self.write(cancel, async {
            conn.del::<_, ()>(&full_key).await.map_err(command_failed)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: StorageEntry,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let full_key = self.full_key(key);
        let mut conn = self.connection(cancel).await?;
        let ttl = new
            .ttl_ms(current_timestamp_ms())
            .map(|ttl| ttl.max(1))
            .unwrap_or(0);

        let swapped: i64 = self
            .write(cancel, async {
                cmd("EVAL")
                    .arg(CAS_SCRIPT)
                    .arg(1)
                    .arg(&full_key)
                    .arg(if expected.is_some() { "1" } else { "0" })
                    .arg(expected.unwrap_or_default())
                    .arg(new.value.as_slice())
                    .arg(ttl)
                    .query_async(&mut *conn)
                    .await
                    .map_err(command_failed)
            })
            .await?;

        if swapped == 0 {
            debug!(key = %full_key, "Compare-and-swap lost to a concurrent writer");
        }
        Ok(swapped == 1)
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close();
            info!("Redis connection pool closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("localhost:6380")
            .with_prefix("test:")
            .with_pool_size(5)
            .with_db(2);

        assert_eq!(config.address, "localhost:6380");
        assert_eq!(config.key_prefix, "test:");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.url(), "redis://localhost:6380/2");
    }

    #[test]
    fn test_redis_url_with_password() {
        let config = RedisConfig::new("redis://cache.internal:6379").with_password("s3cret");
        assert_eq!(config.url(), "redis://:s3cret@cache.internal:6379/0");
    }

    #[test]
    fn test_redis_config_deserialize() {
        let config: RedisConfig = serde_json::from_str(
            r#"{"address": "redis:6379", "pool_size": 32, "command_timeout": "250ms"}"#,
        )
        .unwrap();
        assert_eq!(config.address, "redis:6379");
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.command_timeout, Duration::from_millis(250));
        assert_eq!(config.wait_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_pool_wait_ends_before_command_timeout() {
        let config = RedisConfig::default();
        assert!(config.wait_timeout < config.command_timeout);
    }

    fn live_config() -> RedisConfig {
        let address = std::env::var("REDIS_URL").unwrap_or_else(|_| "localhost:6379".to_string());
        RedisConfig::new(address).with_prefix(format!(
            "keel-unit:{}:{}:",
            std::process::id(),
            current_timestamp_ms()
        ))
    }

    /// Needs a Redis server. Run with: cargo test --features redis -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_saturated_pool_reports_pool_exhausted() {
        let config = live_config()
            .with_pool_size(1)
            .with_wait_timeout(Duration::from_millis(50))
            .with_command_timeout(Duration::from_secs(5));
        let storage = RedisStorage::new(config).await.unwrap();
        let cancel = CancellationToken::new();

        let _held = storage.pool.get().await.unwrap();
        let err = storage.get("k", &cancel).await.unwrap_err();
        assert!(
            matches!(err, RateLimitError::Storage(StorageError::PoolExhausted)),
            "{err:?}"
        );
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    #[ignore]
    async fn test_cancelled_write_is_never_dispatched() {
        let storage = RedisStorage::new(live_config()).await.unwrap();
        let live = CancellationToken::new();
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let err = storage
            .compare_and_swap("k", None, StorageEntry::persistent("v"), &cancelled)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(storage.get("k", &live).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_fast() {
        let mut config = RedisConfig::new("127.0.0.1:1");
        config.connection_timeout = Duration::from_millis(200);

        let err = RedisStorage::new(config).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
