//! Denial events.
//!
//! Every denied admission can be reported to an external sink (a webhook
//! forwarder, an audit log). Publishing never waits: events go into a bounded
//! channel and are dropped when the consumer falls behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::format_duration;

/// Event type tag of [`DenialEvent`].
pub const LIMIT_EXCEEDED: &str = "limit_exceeded";

/// A request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialEvent {
    /// Always [`LIMIT_EXCEEDED`].
    #[serde(rename = "type")]
    pub event_type: String,
    /// Caller key that was limited.
    pub key: String,
    /// Algorithm that denied the request.
    pub algorithm: String,
    /// Configured limit.
    pub limit: u64,
    /// Configured window, as a duration string.
    pub window: String,
    /// When the denial happened (Unix milliseconds).
    pub timestamp: u64,
    /// Human readable summary.
    pub message: String,
}

impl DenialEvent {
    /// Build a `limit_exceeded` event.
    pub fn limit_exceeded(
        key: impl Into<String>,
        algorithm: impl Into<String>,
        limit: u64,
        window: Duration,
        timestamp: u64,
    ) -> Self {
        Self {
            event_type: LIMIT_EXCEEDED.to_string(),
            key: key.into(),
            algorithm: algorithm.into(),
            limit,
            window: format_duration(window),
            timestamp,
            message: "Rate limit exceeded".to_string(),
        }
    }
}

/// Non-blocking publisher of denial events.
#[derive(Debug)]
pub struct EventPublisher {
    sender: mpsc::Sender<DenialEvent>,
    dropped: AtomicU64,
}

impl EventPublisher {
    /// Create a publisher buffering up to `capacity` events, and the receiving
    /// end the sink should drain.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DenialEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Queue an event. Returns `false` if it had to be dropped.
    pub fn publish(&self, event: DenialEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %event.key, "Event buffer full, denial event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(key = %event.key, "Event channel closed, denial event dropped");
                false
            }
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
