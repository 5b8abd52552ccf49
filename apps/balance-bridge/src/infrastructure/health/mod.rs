//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (upstream subscribed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::connector::ConnectorState;
use crate::infrastructure::fanout::BroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Bridge uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection status.
    pub upstream: UpstreamStatus,
    /// Downstream fanout status.
    pub fanout: FanoutStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Subscribed upstream.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Stopped.
    Unhealthy,
}

/// Upstream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Connector state name.
    pub state: String,
    /// Whether the connector is subscribed.
    pub connected: bool,
}

/// Downstream fanout status.
#[derive(Debug, Clone, Serialize)]
pub struct FanoutStatus {
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
    /// Assets in the cached snapshot.
    pub cached_assets: Option<usize>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    connector_state: watch::Receiver<ConnectorState>,
    hub: Arc<BroadcastHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connector_state: watch::Receiver<ConnectorState>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            version,
            connector_state,
            hub,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.connector_state.borrow().is_live() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connector_state = *state.connector_state.borrow();
    let stats = state.hub.stats();

    HealthResponse {
        status: determine_health_status(connector_state),
        version: state.version.clone(),
        uptime_secs: state.hub.uptime_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            state: connector_state.as_str().to_string(),
            connected: connector_state.is_live(),
        },
        fanout: FanoutStatus {
            subscribers: stats.subscribers,
            snapshots_published: stats.snapshots_published,
            errors_published: stats.errors_published,
            subscribers_dropped: stats.subscribers_dropped,
            last_published_at: stats.last_published_at,
            cached_assets: state.hub.latest().map(|s| s.len()),
        },
    }
}

const fn determine_health_status(state: ConnectorState) -> HealthStatus {
    match state {
        ConnectorState::Subscribed => HealthStatus::Healthy,
        ConnectorState::Closing => HealthStatus::Unhealthy,
        ConnectorState::Idle
        | ConnectorState::Connecting
        | ConnectorState::Open
        | ConnectorState::Reconnecting => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::balance::{Balance, Snapshot};

    fn state(
        connector: ConnectorState,
    ) -> (Arc<HealthServerState>, watch::Sender<ConnectorState>, Arc<BroadcastHub>) {
        let (tx, rx) = watch::channel(connector);
        let hub = Arc::new(BroadcastHub::new());
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            rx,
            Arc::clone(&hub),
        ));
        (state, tx, hub)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connector() {
        assert_eq!(
            determine_health_status(ConnectorState::Subscribed),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(ConnectorState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectorState::Closing),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let (state, _tx, _hub) = state(ConnectorState::Idle);
        let (status, body) = get(router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_tracks_subscription() {
        let (state, tx, _hub) = state(ConnectorState::Connecting);

        let (status, _) = get(router(Arc::clone(&state)), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        tx.send_replace(ConnectorState::Subscribed);

        let (status, body) = get(router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_fanout() {
        let (state, _tx, hub) = state(ConnectorState::Subscribed);
        hub.publish(Snapshot::new(vec![Balance {
            asset: "USDT".to_string(),
            free_quote_value: 1.0,
            locked_quote_value: 0.0,
        }]));

        let (status, body) = get(router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["upstream"]["state"], "subscribed");
        assert_eq!(json["fanout"]["snapshots_published"], 1);
        assert_eq!(json["fanout"]["cached_assets"], 1);
    }

    #[tokio::test]
    async fn health_unavailable_when_closing() {
        let (state, _tx, _hub) = state(ConnectorState::Closing);
        let (status, _) = get(router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
