//! Error types for rate limiting operations.
//!
//! Errors fall into three groups that callers must keep apart:
//!
//! - construction errors (`Config`, `UnsupportedAlgorithm`, `InvalidRequest`)
//!   which surface synchronously and never default silently,
//! - availability errors (`Storage`, `Connection`, `Cancelled`) which mean the
//!   admission status could not be determined. These are never a denial.
//! - corrupted per-key state, which is not an error at all: the limiters log
//!   it and reset the key (see [`crate::state::CorruptedState`]).

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown algorithm identifier.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Malformed admission request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RateLimitError {
    /// The backend could not be reached or could not complete the operation.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Connection(_))
    }

    /// The caller's cancellation signal fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The error was caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnsupportedAlgorithm(_) | Self::InvalidRequest(_)
        )
    }

    /// HTTP status an admission endpoint should answer with for this error.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or rejected the operation.
    #[error("Storage unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A backend command did not complete in time.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compare-and-swap kept losing against concurrent writers.
    #[error("Atomic update gave up after {attempts} conflicting attempts")]
    AtomicConflict {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl StorageError {
    /// Create a new unavailable error.
    pub fn unavailable(message: impl Into<String>, retryable: bool) -> Self {
        Self::Unavailable {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { retryable, .. } => *retryable,
            Self::AtomicConflict { .. } => true,
            Self::PoolExhausted => true,
            Self::Timeout(_) => true,
            Self::Serialization(_) => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Limit must be greater than zero.
    #[error("limit must be greater than 0, got {0}")]
    InvalidLimit(u64),

    /// Window must be at least one millisecond.
    #[error("window must be at least 1ms, got {0:?}")]
    InvalidWindow(Duration),

    /// No storage backend was supplied.
    #[error("storage is required")]
    MissingStorage,

    /// Invalid storage configuration.
    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    /// Duration string could not be parsed.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_retryable() {
        let err = StorageError::unavailable("test", true);
        assert!(err.is_retryable());

        let err = StorageError::unavailable("test", false);
        assert!(!err.is_retryable());

        let err = StorageError::AtomicConflict { attempts: 3 };
        assert!(err.is_retryable());

        let err = StorageError::Serialization("bad".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let err: RateLimitError = StorageError::PoolExhausted.into();
        assert!(err.is_unavailable());
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), 500);

        let err: RateLimitError = ConfigError::InvalidLimit(0).into();
        assert!(err.is_client_error());
        assert_eq!(err.status_code(), 400);

        let err = RateLimitError::UnsupportedAlgorithm("leaky".into());
        assert_eq!(err.status_code(), 400);

        let err = RateLimitError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_unavailable());
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_every_error_has_exactly_one_class() {
        let errors: Vec<RateLimitError> = vec![
            StorageError::unavailable("down", true).into(),
            ConfigError::MissingStorage.into(),
            RateLimitError::UnsupportedAlgorithm("leaky".into()),
            RateLimitError::InvalidRequest("key is required".into()),
            ConnectionError::ConnectionFailed("refused".into()).into(),
            RateLimitError::Cancelled,
        ];

        for err in errors {
            let classes = [err.is_client_error(), err.is_unavailable(), err.is_cancelled()];
            assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{err}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::UnsupportedAlgorithm("fixed_window".into());
        assert_eq!(err.to_string(), "Unsupported algorithm: fixed_window");

        let err: RateLimitError = ConfigError::MissingStorage.into();
        assert_eq!(err.to_string(), "Configuration error: storage is required");
    }
}
