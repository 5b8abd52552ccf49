//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Stream frames received, reconnects, connector state
//! - **Listen key**: Renewal outcomes
//! - **Fanout**: Snapshots published, subscriber count, send failures
//! - **Latency**: Snapshot build duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connector::ConnectorState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle created by the first one.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "balance_bridge_upstream_messages_total",
        "Upstream stream frames received by kind"
    );
    describe_counter!(
        "balance_bridge_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_gauge!(
        "balance_bridge_connector_state",
        "Connector state code (0 idle, 1 connecting, 2 open, 3 subscribed, 4 closing, 5 reconnecting)"
    );

    describe_counter!(
        "balance_bridge_listen_key_renewals_total",
        "Listen key renewals by outcome"
    );

    describe_counter!(
        "balance_bridge_snapshots_published_total",
        "Snapshots published to subscribers"
    );
    describe_counter!(
        "balance_bridge_publish_errors_total",
        "Error notifications published to subscribers"
    );
    describe_counter!(
        "balance_bridge_subscriber_send_failures_total",
        "Subscriber deliveries that failed and dropped the subscriber"
    );
    describe_gauge!(
        "balance_bridge_subscribers",
        "Registered downstream subscribers"
    );

    describe_histogram!(
        "balance_bridge_snapshot_build_seconds",
        "Time to fetch balances and prices and value the snapshot"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Inbound frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamMessageKind {
    /// Application ping.
    Ping,
    /// Control acknowledgement.
    Ack,
    /// Channel push event.
    Event,
    /// Undecodable frame.
    Invalid,
}

impl UpstreamMessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Ack => "ack",
            Self::Event => "event",
            Self::Invalid => "invalid",
        }
    }
}

/// Subscriber delivery failure reasons.
#[derive(Debug, Clone, Copy)]
pub enum SendFailureReason {
    /// The subscriber's connection is gone.
    Disconnected,
    /// The subscriber's outbox is full.
    QueueFull,
}

impl SendFailureReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::QueueFull => "queue_full",
        }
    }
}

/// Record an upstream frame.
pub fn record_upstream_message(kind: UpstreamMessageKind) {
    counter!(
        "balance_bridge_upstream_messages_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("balance_bridge_reconnects_total").increment(1);
}

/// Record the connector's current state.
pub fn set_connector_state(state: ConnectorState) {
    gauge!("balance_bridge_connector_state").set(f64::from(state.code()));
}

/// Record a listen key renewal outcome.
pub fn record_listen_key_renewal(success: bool) {
    counter!(
        "balance_bridge_listen_key_renewals_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a published snapshot.
pub fn record_snapshot_published() {
    counter!("balance_bridge_snapshots_published_total").increment(1);
}

/// Record a published error notification.
pub fn record_publish_error() {
    counter!("balance_bridge_publish_errors_total").increment(1);
}

/// Record a failed subscriber delivery.
pub fn record_subscriber_send_failure(reason: SendFailureReason) {
    counter!(
        "balance_bridge_subscriber_send_failures_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Set the registered subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("balance_bridge_subscribers").set(count as f64);
}

/// Record snapshot build time.
pub fn record_snapshot_build_duration(duration: Duration) {
    histogram!("balance_bridge_snapshot_build_seconds").record(duration.as_secs_f64());
}
