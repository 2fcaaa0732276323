//! Storage entry type for rate limiting state.

/// Entry stored in the storage backend.
///
/// The value is an opaque, already-encoded state blob; the backend never
/// interprets it. `expires_at` is an absolute Unix timestamp in milliseconds,
/// `None` meaning the entry never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Encoded algorithm state.
    pub value: Vec<u8>,

    /// Absolute expiration (Unix milliseconds).
    pub expires_at: Option<u64>,
}

impl StorageEntry {
    /// Create a new entry.
    ///
    /// An expiration of `Some(0)` is normalised to "never expires".
    pub fn new(value: impl Into<Vec<u8>>, expires_at: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_at: expires_at.filter(|&at| at > 0),
        }
    }

    /// Create an entry that never expires.
    pub fn persistent(value: impl Into<Vec<u8>>) -> Self {
        Self::new(value, None)
    }

    /// Whether the entry is past its expiration at `now_ms`.
    ///
    /// An entry is expired at and after its expiration instant.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    /// Milliseconds left before expiration, if any.
    pub fn ttl_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at.map(|at| at.saturating_sub(now_ms))
    }
}
