//! Integration tests for the admission service.

use std::sync::Arc;
use std::time::Duration;

use keel_ratelimit::storage::{GcConfig, MemoryStorage, Storage, StorageEntry, StorageKind};
use keel_ratelimit::{
    AdmissionService, CheckRequest, EventPublisher, LimiterDefaults, RateLimitError, Result,
    ServiceConfig, StorageError,
};
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

fn service(limit: u64) -> AdmissionService<MemoryStorage> {
    let defaults = LimiterDefaults {
        limit,
        ..LimiterDefaults::default()
    };
    AdmissionService::new(Arc::new(MemoryStorage::with_gc(GcConfig::manual())), defaults)
}

/// A backend that is always down.
struct DownStorage;

impl Storage for DownStorage {
    async fn get(&self, _key: &str, _cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        Err(StorageError::unavailable("connection refused", true).into())
    }

    async fn set(&self, _: &str, _: StorageEntry, _: &CancellationToken) -> Result<()> {
        Err(StorageError::unavailable("connection refused", true).into())
    }

    async fn delete(&self, _key: &str, _cancel: &CancellationToken) -> Result<()> {
        Err(StorageError::unavailable("connection refused", true).into())
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&[u8]>,
        _new: StorageEntry,
        _cancel: &CancellationToken,
    ) -> Result<bool> {
        Err(StorageError::PoolExhausted.into())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_allowed_then_denied_with_message() {
    let service = service(2);
    let cancel = CancellationToken::new();

    for remaining in [1, 0] {
        let response = service.check(CheckRequest::new("u1"), &cancel).await.unwrap();
        assert!(response.allowed);
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.remaining, Some(remaining));
        assert!(response.message.is_none());
    }

    let now_secs = keel_ratelimit::current_timestamp_ms() / 1000;
    let response = service.check(CheckRequest::new("u1"), &cancel).await.unwrap();
    assert!(!response.allowed);
    assert_eq!(response.status_code(), 429);
    assert_eq!(response.message.as_deref(), Some("Rate limit exceeded"));

    // Default window is one minute.
    let reset_at = response.reset_at.unwrap();
    assert!(reset_at >= now_secs + 60 && reset_at <= now_secs + 61);
}

#[tokio::test]
async fn test_request_overrides_defaults() {
    let service = service(100);
    let cancel = CancellationToken::new();
    let request = CheckRequest::new("u1")
        .with_algorithm("sliding_window")
        .with_limit(1)
        .with_window("10s");

    assert!(service.check(request.clone(), &cancel).await.unwrap().allowed);
    assert!(!service.check(request, &cancel).await.unwrap().allowed);

    // Same key under the defaults is a different limiter.
    assert!(service.check(CheckRequest::new("u1"), &cancel).await.unwrap().allowed);
}

#[tokio::test]
async fn test_empty_overrides_fall_back_to_defaults() {
    let service = service(3);
    let cancel = CancellationToken::new();
    let request = CheckRequest::from_slice(br#"{"key": "u1", "algorithm": "", "window": ""}"#).unwrap();

    let response = service.check(request, &cancel).await.unwrap();
    assert_eq!(response.remaining, Some(2));
}

#[tokio::test]
async fn test_keys_are_not_normalised() {
    let service = service(1);
    let cancel = CancellationToken::new();

    assert!(service.check(CheckRequest::new("u1"), &cancel).await.unwrap().allowed);
    assert!(!service.check(CheckRequest::new("u1"), &cancel).await.unwrap().allowed);

    // Surrounding whitespace makes a distinct caller key.
    assert!(service.check(CheckRequest::new(" u1"), &cancel).await.unwrap().allowed);
    assert!(service.check(CheckRequest::new("u1 "), &cancel).await.unwrap().allowed);
    assert_eq!(service.storage().len(), 3);
}

#[tokio::test]
async fn test_invalid_input_is_client_error() {
    let service = service(5);
    let cancel = CancellationToken::new();

    let cases = [
        CheckRequest::new(""),
        CheckRequest::new("   "),
        CheckRequest::new("u1").with_algorithm("leaky_bucket"),
        CheckRequest::new("u1").with_limit(0),
        CheckRequest::new("u1").with_window("soon"),
        CheckRequest::new("u1").with_window("0"),
    ];
    for request in cases {
        let err = assert_err!(service.check(request.clone(), &cancel).await);
        assert!(err.is_client_error(), "{request:?} gave {err}");
        assert_eq!(err.status_code(), 400);
    }
}

#[tokio::test]
async fn test_unavailable_storage_is_not_a_denial() {
    let service = AdmissionService::new(Arc::new(DownStorage), LimiterDefaults::default());
    let cancel = CancellationToken::new();

    let err = assert_err!(service.check(CheckRequest::new("u1"), &cancel).await);
    assert!(err.is_unavailable());
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_cancelled_check_is_server_error() {
    let service = service(5);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(service.check(CheckRequest::new("u1"), &cancel).await);
    assert!(matches!(err, RateLimitError::Cancelled));
    assert_eq!(err.status_code(), 500);
    assert!(service.storage().is_empty());
}

#[tokio::test]
async fn test_denial_publishes_event() {
    let (publisher, mut events) = EventPublisher::new(8);
    let service = service(1).with_events(publisher);
    let cancel = CancellationToken::new();
    let request = CheckRequest::new("u1").with_window("30s");

    service.check(request.clone(), &cancel).await.unwrap();
    assert!(events.try_recv().is_err(), "allowed requests publish nothing");

    service.check(request, &cancel).await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, "limit_exceeded");
    assert_eq!(event.key, "u1");
    assert_eq!(event.algorithm, "token_bucket");
    assert_eq!(event.limit, 1);
    assert_eq!(event.window, "30s");
    assert_eq!(event.message, "Rate limit exceeded");
}

#[tokio::test]
async fn test_full_event_buffer_never_blocks_decisions() {
    let (publisher, _events) = EventPublisher::new(1);
    let service = service(1).with_events(publisher);
    let cancel = CancellationToken::new();

    service.check(CheckRequest::new("u1"), &cancel).await.unwrap();
    for _ in 0..5 {
        let response = tokio::time::timeout(
            Duration::from_secs(1),
            service.check(CheckRequest::new("u1"), &cancel),
        )
        .await
        .expect("check must not wait on the event buffer")
        .unwrap();
        assert!(!response.allowed);
    }
}

#[tokio::test]
async fn test_service_from_config() {
    let config: ServiceConfig = serde_json::from_str(
        r#"{
            "storage": {"backend": "memory", "sweep_interval": "0"},
            "limiter": {"algorithm": "sliding_window", "limit": 2, "window": "1m"},
            "events": {"enabled": true, "capacity": 4}
        }"#,
    )
    .unwrap();

    let (service, events) = AdmissionService::from_config(config).await.unwrap();
    assert_eq!(service.storage().kind(), StorageKind::Memory);
    let mut events = events.expect("events enabled");
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        assert!(service.check(CheckRequest::new("u1"), &cancel).await.unwrap().allowed);
    }
    assert!(!service.check(CheckRequest::new("u1"), &cancel).await.unwrap().allowed);
    assert_eq!(events.recv().await.unwrap().algorithm, "sliding_window");

    service.close().await.unwrap();
    service.close().await.unwrap();
}
