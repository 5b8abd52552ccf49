//! Bridge Coordinator
//!
//! Wires the exchange adapters, the broadcast hub, and the local servers
//! into one running bridge, and tears them down in order.
//!
//! ```text
//! RestClient ─┬─► SessionKeyManager ──► SessionKeyRenewer
//!             │          │
//!             │          ▼
//!             └─► RestQuoteSource ──► StreamConnector ──► BroadcastHub ──► FanoutServer
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::{QuoteSource, SessionKeyProvider, UpstreamTransport};
use crate::application::services::AccountSnapshotBuilder;
use crate::domain::connector::ConnectorState;
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::exchange::heartbeat::HeartbeatConfig;
use crate::infrastructure::exchange::reconnect::ReconnectConfig;
use crate::infrastructure::exchange::{
    ConnectorConfig, RestClient, RestError, RestQuoteSource, SessionKeyManager, SessionKeyRenewer,
    StreamConnector, TungsteniteTransport,
};
use crate::infrastructure::fanout::{BroadcastHub, FanoutServer, FanoutServerError};
use crate::infrastructure::health::{HealthServer, HealthServerState};

/// Errors raised while starting the bridge.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// REST client construction failed.
    #[error("failed to build REST client: {0}")]
    Rest(#[from] RestError),

    /// Subscriber endpoint could not be bound.
    #[error(transparent)]
    Fanout(#[from] FanoutServerError),
}

/// Exchange-facing collaborators of the bridge.
pub struct Upstream {
    /// Listen-key provider shared by the connector and the renewer.
    pub session_keys: Arc<dyn SessionKeyProvider>,
    /// Balance and price source for snapshot rebuilds.
    pub quotes: Arc<dyn QuoteSource>,
    /// Stream transport.
    pub transport: Arc<dyn UpstreamTransport>,
}

impl Upstream {
    /// Production collaborators talking to the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn exchange(config: &BridgeConfig) -> Result<Self, RestError> {
        let rest = Arc::new(RestClient::new(
            config.exchange.rest_url.as_str(),
            &config.credentials,
            config.exchange.rest_timeout,
        )?);
        tracing::debug!(rest_url = rest.base_url(), "REST client ready");

        Ok(Self {
            session_keys: Arc::new(SessionKeyManager::new(Arc::clone(&rest))),
            quotes: Arc::new(RestQuoteSource::new(rest)),
            transport: Arc::new(TungsteniteTransport::new()),
        })
    }
}

/// A running bridge.
pub struct Coordinator {
    hub: Arc<BroadcastHub>,
    connector: Arc<StreamConnector>,
    fanout_addr: Option<SocketAddr>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Start the bridge against the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the REST client cannot be built or the subscriber
    /// endpoint cannot be bound.
    pub async fn start(config: &BridgeConfig) -> Result<Self, CoordinatorError> {
        let upstream = Upstream::exchange(config)?;
        Self::start_with(config, upstream).await
    }

    /// Start the bridge with the given upstream collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber endpoint cannot be bound.
    pub async fn start_with(
        config: &BridgeConfig,
        upstream: Upstream,
    ) -> Result<Self, CoordinatorError> {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let hub = Arc::new(BroadcastHub::new());

        // Bind first: a port clash must leave nothing running.
        let fanout = if config.fanout.enabled {
            Some(
                FanoutServer::bind(
                    &config.fanout.bind_addr(),
                    Arc::clone(&hub),
                    config.fanout.subscriber_queue_capacity,
                    cancel.child_token(),
                )
                .await?,
            )
        } else {
            tracing::info!("Fanout endpoint disabled");
            None
        };
        let fanout_addr = fanout.as_ref().and_then(|server| server.local_addr().ok());

        let builder = AccountSnapshotBuilder::new(upstream.quotes, config.quote_currency.as_str());
        let connector = Arc::new(StreamConnector::new(
            connector_config(config),
            Arc::clone(&upstream.session_keys),
            upstream.transport,
            builder,
            Arc::clone(&hub),
            cancel.child_token(),
        ));

        let renewer = SessionKeyRenewer::new(
            upstream.session_keys,
            config.session.renew_interval,
            config.session.retry_cooldown,
            cancel.child_token(),
        );

        tracker.spawn(Arc::clone(&connector).run());
        tracker.spawn(renewer.run());

        if let Some(server) = fanout {
            tracker.spawn(server.run());
        }

        if config.server.health_port == 0 {
            tracing::info!("Health server disabled");
        } else {
            let state = Arc::new(HealthServerState::new(
                env!("CARGO_PKG_VERSION").to_string(),
                connector.watch_state(),
                Arc::clone(&hub),
            ));
            let server = HealthServer::new(config.server.health_port, state, cancel.child_token());
            tracker.spawn(async move {
                if let Err(e) = server.run().await {
                    tracing::error!(error = %e, "Health server error");
                }
            });
        }

        tracing::info!(
            quote_currency = %config.quote_currency,
            channels = ?config.exchange.stream_channels,
            fanout_addr = ?fanout_addr,
            "Bridge started"
        );

        Ok(Self {
            hub,
            connector,
            fanout_addr,
            tracker,
            cancel,
        })
    }

    /// The broadcast hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Address the subscriber endpoint is bound to, if enabled.
    #[must_use]
    pub const fn fanout_addr(&self) -> Option<SocketAddr> {
        self.fanout_addr
    }

    /// Current connector state.
    #[must_use]
    pub fn connector_state(&self) -> ConnectorState {
        self.connector.state()
    }

    /// Subscribe to connector state changes.
    #[must_use]
    pub fn watch_connector_state(&self) -> watch::Receiver<ConnectorState> {
        self.connector.watch_state()
    }

    /// Stop every task and wait up to `grace` for them to finish.
    ///
    /// The connector closes the upstream socket, subscriber outboxes are
    /// closed so their connections end, then the servers stop. Returns
    /// `false` if tasks were still running when the grace period ran out.
    pub async fn shutdown(self, grace: Duration) -> bool {
        tracing::info!(grace_secs = grace.as_secs(), "Shutting down bridge");

        self.cancel.cancel();
        self.hub.close_all();
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Shutdown grace period elapsed with tasks still running"
            );
            return false;
        }

        tracing::info!("Bridge stopped");
        true
    }
}

fn connector_config(config: &BridgeConfig) -> ConnectorConfig {
    let stream = &config.stream;
    ConnectorConfig::new(
        config.exchange.ws_url.as_str(),
        config.exchange.stream_channels.clone(),
    )
    .with_heartbeat(HeartbeatConfig::new(
        stream.ping_interval,
        stream.pong_timeout,
    ))
    .with_reconnect(ReconnectConfig::new(
        stream.reconnect_delay_initial,
        stream.reconnect_delay_max,
        stream.reconnect_delay_multiplier,
        stream.reconnect_jitter,
    ))
    .with_transport_ping_interval(stream.transport_ping_interval)
}
