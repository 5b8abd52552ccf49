//! Broadcast Hub
//!
//! Registry of downstream subscribers plus the most recently published
//! snapshot. A single mutex guards both, so a subscriber registering while a
//! snapshot is being published sees the catch-up snapshot strictly before
//! any newer one.
//!
//! Each subscriber owns a bounded outbox. Publishing never waits on a
//! subscriber: a closed or full outbox drops that subscriber and fanout
//! continues with the rest.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::domain::balance::Snapshot;
use crate::infrastructure::metrics::{self, SendFailureReason};

// =============================================================================
// Subscribers
// =============================================================================

/// Subscriber identity, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutMessage {
    /// A balance snapshot.
    Snapshot(Arc<Snapshot>),
    /// A best-effort error notification.
    Error(Arc<str>),
}

impl FanoutMessage {
    /// Wire representation: the snapshot array, or `{"error": "..."}`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Snapshot(snapshot) => snapshot.to_json(),
            Self::Error(message) => {
                serde_json::to_string(&serde_json::json!({ "error": message.as_ref() }))
            }
        }
    }
}

/// Registration handle: an id and the sending half of the outbox.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    outbox: mpsc::Sender<FanoutMessage>,
}

impl Subscriber {
    /// Wrap an existing outbox.
    #[must_use]
    pub fn new(outbox: mpsc::Sender<FanoutMessage>) -> Self {
        Self {
            id: SubscriberId::new(),
            outbox,
        }
    }

    /// Create a subscriber with a fresh bounded outbox and return its receiver.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FanoutMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, message: FanoutMessage) -> Result<(), SubscriberSendError> {
        self.outbox.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SubscriberSendError::QueueFull(self.id),
            TrySendError::Closed(_) => SubscriberSendError::Disconnected(self.id),
        })
    }
}

/// Delivery to one subscriber failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberSendError {
    /// The subscriber's connection is gone.
    #[error("subscriber {0} disconnected")]
    Disconnected(SubscriberId),
    /// The subscriber is not keeping up.
    #[error("subscriber {0} outbox full")]
    QueueFull(SubscriberId),
}

impl SubscriberSendError {
    const fn reason(self) -> SendFailureReason {
        match self {
            Self::Disconnected(_) => SendFailureReason::Disconnected,
            Self::QueueFull(_) => SendFailureReason::QueueFull,
        }
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that received the message.
    pub delivered: usize,
    /// Subscribers dropped because delivery failed.
    pub dropped: usize,
}

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Snapshots published since start.
    pub snapshots_published: u64,
    /// Error notifications published since start.
    pub errors_published: u64,
    /// Subscribers dropped after a failed delivery.
    pub subscribers_dropped: u64,
    /// Time of the last snapshot publish.
    pub last_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct HubState {
    subscribers: HashMap<SubscriberId, Subscriber>,
    latest: Option<Arc<Snapshot>>,
    stats: HubStats,
}

impl HubState {
    fn fanout(&mut self, message: &FanoutMessage) -> PublishReport {
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for subscriber in self.subscribers.values() {
            match subscriber.deliver(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => failed.push(e),
            }
        }

        for err in failed {
            let id = match err {
                SubscriberSendError::Disconnected(id) | SubscriberSendError::QueueFull(id) => id,
            };
            self.subscribers.remove(&id);
            self.stats.subscribers_dropped += 1;
            report.dropped += 1;
            metrics::record_subscriber_send_failure(err.reason());
            tracing::warn!(error = %err, "Dropping subscriber");
        }

        self.stats.subscribers = self.subscribers.len();
        if report.dropped > 0 {
            metrics::set_subscribers(self.subscribers.len());
        }
        report
    }
}

/// Subscriber registry and latest-snapshot cache.
#[derive(Debug)]
pub struct BroadcastHub {
    state: Mutex<HubState>,
    started_at: Instant,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            started_at: Instant::now(),
        }
    }

    /// Register a subscriber.
    ///
    /// If a snapshot has been published, it is sent to this subscriber only,
    /// before any later publish can reach it. A subscriber whose catch-up
    /// delivery fails is not registered.
    ///
    /// # Errors
    ///
    /// Returns the catch-up delivery failure.
    pub fn register(&self, subscriber: Subscriber) -> Result<(), SubscriberSendError> {
        let mut state = self.state.lock();

        if let Some(latest) = &state.latest {
            subscriber.deliver(FanoutMessage::Snapshot(Arc::clone(latest)))?;
        }

        tracing::debug!(subscriber = %subscriber.id(), "Subscriber registered");
        state.subscribers.insert(subscriber.id(), subscriber);
        state.stats.subscribers = state.subscribers.len();
        metrics::set_subscribers(state.subscribers.len());
        Ok(())
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let mut state = self.state.lock();
        if state.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = %id, "Subscriber unregistered");
            state.stats.subscribers = state.subscribers.len();
            metrics::set_subscribers(state.subscribers.len());
        }
    }

    /// Cache `snapshot` as the latest and deliver it to every subscriber.
    pub fn publish(&self, snapshot: Snapshot) -> PublishReport {
        let snapshot = Arc::new(snapshot);
        let mut state = self.state.lock();

        state.latest = Some(Arc::clone(&snapshot));
        state.stats.snapshots_published += 1;
        state.stats.last_published_at = Some(Utc::now());

        let report = state.fanout(&FanoutMessage::Snapshot(snapshot));
        drop(state);

        metrics::record_snapshot_published();
        tracing::debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            "Snapshot published"
        );
        report
    }

    /// Deliver `{"error": message}` to every subscriber. Not cached.
    pub fn publish_error(&self, message: &str) -> PublishReport {
        let mut state = self.state.lock();
        state.stats.errors_published += 1;
        let report = state.fanout(&FanoutMessage::Error(Arc::from(message)));
        drop(state);

        metrics::record_publish_error();
        report
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.state.lock().latest.clone()
    }

    /// Registered subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.state.lock().stats.clone()
    }

    /// Time since the hub was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Drop every subscriber, closing their outboxes.
    pub fn close_all(&self) {
        let mut state = self.state.lock();
        let count = state.subscribers.len();
        state.subscribers.clear();
        state.stats.subscribers = 0;
        drop(state);

        metrics::set_subscribers(0);
        tracing::info!(count, "Closed all subscribers");
    }
}
