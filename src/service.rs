//! Admission service.
//!
//! The layer an HTTP handler calls: it takes a loosely specified request,
//! fills the gaps from [`LimiterDefaults`], builds a limiter through the
//! [`LimiterFactory`], decides, and reports denials as events. Wire-level
//! concerns stay with the caller; [`CheckResponse::status_code`] and
//! [`RateLimitError::status_code`] say which status to answer with.
//!
//! # Example
//!
//! ```ignore
//! use keel_ratelimit::{AdmissionService, CheckRequest, LimiterDefaults, MemoryStorage};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let service = AdmissionService::new(Arc::new(MemoryStorage::new()), LimiterDefaults::default());
//! let response = service
//!     .check(CheckRequest::new("user:42"), &CancellationToken::new())
//!     .await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::algorithm::Algorithm;
use crate::config::{LimiterDefaults, ServiceConfig, parse_duration};
use crate::error::{RateLimitError, Result};
use crate::events::{DenialEvent, EventPublisher};
use crate::factory::{LimiterConfig, LimiterFactory};
use crate::storage::{Storage, current_timestamp_ms};
#[cfg(any(feature = "memory", feature = "redis"))]
use crate::storage::AnyStorage;

/// Message attached to denied responses.
pub const DENIED_MESSAGE: &str = "Rate limit exceeded";

/// An admission check as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Caller key; required and non-blank.
    pub key: String,
    /// Algorithm override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Limit override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Window override as a duration string, e.g. `"30s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

impl CheckRequest {
    /// A request relying on every default.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Override the algorithm.
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    /// Override the limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the window.
    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = Some(window.into());
        self
    }

    /// Parse a JSON request body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| RateLimitError::InvalidRequest(e.to_string()))
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left for the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    /// When the key's limiter state lapses (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<u64>,
    /// Explanation, present on denial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResponse {
    /// HTTP status for this outcome: 200 when allowed, 429 when denied.
    pub fn status_code(&self) -> u16 {
        if self.allowed { 200 } else { 429 }
    }
}

/// Runs admission checks against one storage backend.
pub struct AdmissionService<S> {
    storage: Arc<S>,
    defaults: LimiterDefaults,
    events: Option<EventPublisher>,
}

impl<S: Storage> AdmissionService<S> {
    /// Create a service without event publishing.
    pub fn new(storage: Arc<S>, defaults: LimiterDefaults) -> Self {
        Self {
            storage,
            defaults,
            events: None,
        }
    }

    /// Publish denial events through `publisher`.
    pub fn with_events(mut self, publisher: EventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    /// The shared storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Defaults applied to incomplete requests.
    pub fn defaults(&self) -> &LimiterDefaults {
        &self.defaults
    }

    /// Decide one request.
    ///
    /// Input problems are client errors (400); backend failures and
    /// cancellation are not denials and surface as errors (500).
    pub async fn check(
        &self,
        request: CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<CheckResponse> {
        let key = request.key.as_str();
        if key.trim().is_empty() {
            return Err(RateLimitError::InvalidRequest("key is required".to_string()));
        }

        let algorithm = request
            .algorithm
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.defaults.algorithm.to_string());
        let limit = request.limit.unwrap_or(self.defaults.limit);
        let window = match request.window.as_deref() {
            Some(window) if !window.is_empty() => parse_duration(window)?,
            _ => self.defaults.window,
        };

        let limiter = LimiterFactory::create(
            LimiterConfig::new(algorithm, limit, window).with_storage(Arc::clone(&self.storage)),
        )
        .inspect_err(|e| warn!(error = %e, "Rejected limiter parameters"))?;

        let decision = limiter
            .allow(key, cancel)
            .await
            .inspect_err(|e| error!(key = %key, algorithm = limiter.name(), error = %e, "Failed to check limit"))?;

        let info = decision.info();
        let mut response = CheckResponse {
            allowed: decision.is_allowed(),
            remaining: Some(info.remaining),
            reset_at: Some(info.reset_at_secs()),
            message: None,
        };

        if decision.is_denied() {
            response.message = Some(DENIED_MESSAGE.to_string());
            if let Some(events) = &self.events {
                events.publish(DenialEvent::limit_exceeded(
                    key,
                    limiter.name(),
                    limit,
                    window,
                    current_timestamp_ms(),
                ));
            }
        }

        debug!(key = %key, algorithm = limiter.name(), allowed = response.allowed, "Admission checked");
        Ok(response)
    }

    /// Close the storage backend.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}

#[cfg(any(feature = "memory", feature = "redis"))]
impl AdmissionService<AnyStorage> {
    /// Build the backend and the service described by `config`.
    ///
    /// When events are enabled the receiving end of the event channel is
    /// returned for the sink to drain.
    pub async fn from_config(
        config: ServiceConfig,
    ) -> Result<(Self, Option<mpsc::Receiver<DenialEvent>>)> {
        let storage = Arc::new(config.storage.build().await?);
        let mut service = Self::new(storage, config.limiter);

        let receiver = if config.events.enabled {
            let (publisher, receiver) = EventPublisher::new(config.events.capacity);
            service = service.with_events(publisher);
            Some(receiver)
        } else {
            None
        };

        info!(
            backend = %service.storage.kind(),
            algorithm = %service.defaults.algorithm,
            limit = service.defaults.limit,
            events = receiver.is_some(),
            "Admission service ready"
        );
        Ok((service, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request = CheckRequest::from_slice(
            br#"{"key": "u1", "algorithm": "sliding_window", "limit": 5, "window": "1s"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            CheckRequest::new("u1")
                .with_algorithm("sliding_window")
                .with_limit(5)
                .with_window("1s")
        );

        let request = CheckRequest::from_slice(br#"{"key": "u1"}"#).unwrap();
        assert_eq!(request, CheckRequest::new("u1"));
    }

    #[test]
    fn test_malformed_request_is_client_error() {
        for body in [&b"not json"[..], br#"{"limit": 5}"#, br#"{"key": "u1", "limit": -1}"#] {
            let err = CheckRequest::from_slice(body).unwrap_err();
            assert!(matches!(err, RateLimitError::InvalidRequest(_)));
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn test_response_shape() {
        let allowed = CheckResponse {
            allowed: true,
            remaining: Some(4),
            reset_at: Some(1_700_000_001),
            message: None,
        };
        assert_eq!(allowed.status_code(), 200);
        let json = serde_json::to_value(&allowed).unwrap();
        assert_eq!(json["reset_at"], 1_700_000_001u64);
        assert!(json.get("message").is_none());

        let denied = CheckResponse {
            allowed: false,
            remaining: Some(0),
            reset_at: None,
            message: Some(DENIED_MESSAGE.to_string()),
        };
        assert_eq!(denied.status_code(), 429);
    }
}
