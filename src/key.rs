//! Storage key scoping.
//!
//! Caller keys are namespaced by the limiter that owns them, so two limiters
//! with different algorithms or quotas never read each other's state even
//! when they share a backend and a caller key.

use crate::quota::Quota;

/// Build the storage key for `key` under a limiter.
///
/// Format: `{algorithm}:{limit}:{window_ms}:{key}`.
pub fn scoped_key(algorithm: &str, quota: &Quota, key: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        algorithm,
        quota.limit(),
        quota.window_ms(),
        key
    )
}
