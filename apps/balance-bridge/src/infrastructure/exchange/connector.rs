//! Stream Connector
//!
//! Drives the upstream user-data connection through the
//! [`ConnectorState`] machine: acquire a listen key, connect, subscribe,
//! keep the connection alive, and on every channel event rebuild the
//! account snapshot and publish it to the hub. Any connection failure leads
//! to a delayed reconnect; only cancellation ends the loop.
//!
//! Inbound frames are processed strictly in order: a snapshot build for one
//! event completes before the next frame is handled. Reading continues
//! during a build so keepalive pings go out and server pings are answered
//! while the REST calls are pending.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{MethodRequest, PongReply, StreamMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    SessionKeyProvider, TransportError, UpstreamSink, UpstreamSource, UpstreamTransport,
};
use crate::application::services::AccountSnapshotBuilder;
use crate::domain::connector::{ConnectorInput, ConnectorState, TransportEvent};
use crate::infrastructure::fanout::BroadcastHub;
use crate::infrastructure::metrics::{self, UpstreamMessageKind};

// =============================================================================
// Configuration
// =============================================================================

/// Default interval between transport-level pings.
pub const DEFAULT_TRANSPORT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the stream connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Stream base URL; `?listenKey=<key>` is appended.
    pub ws_url: String,
    /// Channels subscribed after every connect.
    pub channels: Vec<String>,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Interval between transport-level pings; zero disables them.
    pub transport_ping_interval: Duration,
}

impl ConnectorConfig {
    /// Create a configuration with default heartbeat and reconnect settings.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            channels,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            transport_ping_interval: DEFAULT_TRANSPORT_PING_INTERVAL,
        }
    }

    /// Replace the heartbeat configuration.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Replace the reconnection configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Replace the transport-level ping interval.
    #[must_use]
    pub const fn with_transport_ping_interval(mut self, interval: Duration) -> Self {
        self.transport_ping_interval = interval;
        self
    }

    fn stream_url(&self, listen_key: &str) -> String {
        format!("{}?listenKey={listen_key}", self.ws_url)
    }
}

/// How a connection attempt ended.
enum SessionEnd {
    /// Cancelled; the connector should stop.
    Stopped,
    /// Failed; the connector should reconnect.
    Failed,
}

// =============================================================================
// Connector
// =============================================================================

/// Upstream stream connector.
pub struct StreamConnector {
    config: ConnectorConfig,
    session_keys: Arc<dyn SessionKeyProvider>,
    transport: Arc<dyn UpstreamTransport>,
    builder: AccountSnapshotBuilder,
    hub: Arc<BroadcastHub>,
    codec: JsonCodec,
    state_tx: watch::Sender<ConnectorState>,
    cancel: CancellationToken,
}

impl StreamConnector {
    /// Create a connector in the `Idle` state.
    #[must_use]
    pub fn new(
        config: ConnectorConfig,
        session_keys: Arc<dyn SessionKeyProvider>,
        transport: Arc<dyn UpstreamTransport>,
        builder: AccountSnapshotBuilder,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectorState::Idle);
        Self {
            config,
            session_keys,
            transport,
            builder,
            hub,
            codec: JsonCodec::new(),
            state_tx,
            cancel,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectorState> {
        self.state_tx.subscribe()
    }

    /// Request shutdown. The run loop moves to `Closing` and returns.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until stopped.
    pub async fn run(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        self.apply(ConnectorInput::Start);

        loop {
            match self.connect_and_run(&mut policy).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed => {}
            }

            metrics::record_reconnect();
            let delay = policy.next_delay();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to user data stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            self.apply(ConnectorInput::ReconnectDelayElapsed);
        }

        self.apply(ConnectorInput::Stop);
        tracing::info!("Stream connector stopped");
    }

    /// Apply an input to the state machine and publish the result.
    fn apply(&self, input: ConnectorInput) -> ConnectorState {
        let current = self.state();
        let next = current.next(&input);
        if next != current {
            self.state_tx.send_replace(next);
            metrics::set_connector_state(next);
            tracing::info!(from = %current, to = %next, "Connector state changed");
        }
        next
    }

    /// One connection from listen-key acquisition to disconnect.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> SessionEnd {
        let (mut sink, mut source) = match self.open().await {
            Some(Ok(conn)) => conn,
            Some(Err(reason)) => {
                tracing::warn!(error = %reason, "Failed to open user data stream");
                self.apply(ConnectorInput::OpenFailed);
                return SessionEnd::Failed;
            }
            None => return SessionEnd::Stopped,
        };
        self.apply(ConnectorInput::Transport(TransportEvent::Opened));

        if let Err(e) = self.subscribe(sink.as_mut()).await {
            return self.end_session(sink.as_mut(), TransportEvent::SendFailed(e.to_string())).await;
        }
        self.apply(ConnectorInput::SubscribeSent);
        policy.reset();

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        let keepalive_period = self.config.transport_ping_interval;
        let keepalive_enabled = !keepalive_period.is_zero();
        let keepalive_period = keepalive_period.max(Duration::from_millis(1));
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + keepalive_period,
            keepalive_period,
        );
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Frames read while a build is in flight wait here, except pings.
        let mut backlog: VecDeque<Result<StreamMessage, CodecError>> = VecDeque::new();
        let mut build: Option<BoxFuture<'_, ()>> = None;

        loop {
            while build.is_none() {
                let Some(message) = backlog.pop_front() else {
                    break;
                };
                build = self.dispatch(message);
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    sink.close().await;
                    return SessionEnd::Stopped;
                }
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        heartbeat_state.mark_ping_sent();
                        if let Err(e) = self.send_ping(sink.as_mut()).await {
                            return self
                                .end_session(sink.as_mut(), TransportEvent::SendFailed(e.to_string()))
                                .await;
                        }
                    }
                    HeartbeatEvent::Timeout => {
                        return self
                            .end_session(
                                sink.as_mut(),
                                TransportEvent::Closed("heartbeat timeout".to_string()),
                            )
                            .await;
                    }
                },
                _ = keepalive.tick(), if keepalive_enabled => {
                    if let Err(e) = sink.send_keepalive().await {
                        return self
                            .end_session(sink.as_mut(), TransportEvent::SendFailed(e.to_string()))
                            .await;
                    }
                }
                () = async {
                    if let Some(pending) = build.as_mut() {
                        pending.await;
                    }
                }, if build.is_some() => {
                    build = None;
                }
                event = source.next_event() => match event {
                    TransportEvent::MessageReceived(text) => {
                        heartbeat_state.record_activity();
                        match self.codec.decode(&text) {
                            Ok(StreamMessage::Ping(value)) => {
                                if let Err(e) = self.send_pong(value, sink.as_mut()).await {
                                    return self
                                        .end_session(sink.as_mut(), TransportEvent::SendFailed(e.to_string()))
                                        .await;
                                }
                            }
                            message => backlog.push_back(message),
                        }
                    }
                    TransportEvent::Opened => {}
                    ended @ (TransportEvent::Closed(_) | TransportEvent::SendFailed(_)) => {
                        return self.end_session(sink.as_mut(), ended).await;
                    }
                },
            }
        }
    }

    /// Acquire a listen key and connect. `None` means cancelled.
    async fn open(
        &self,
    ) -> Option<Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamSource>), String>> {
        let attempt = async {
            let token = self
                .session_keys
                .acquire()
                .await
                .map_err(|e| e.to_string())?;
            let url = self.config.stream_url(token.value());
            tracing::info!(url = %self.config.ws_url, "Connecting to user data stream");
            self.transport
                .connect(&url)
                .await
                .map_err(|e| e.to_string())
        };

        tokio::select! {
            () = self.cancel.cancelled() => None,
            result = attempt => Some(result),
        }
    }

    async fn subscribe(&self, sink: &mut dyn UpstreamSink) -> Result<(), TransportError> {
        let request = MethodRequest::subscribe(self.config.channels.iter().cloned());
        let text = self
            .codec
            .encode(&request)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.send_text(text).await?;
        tracing::info!(channels = ?self.config.channels, "Subscribe request sent");
        Ok(())
    }

    async fn send_ping(&self, sink: &mut dyn UpstreamSink) -> Result<(), TransportError> {
        let text = self
            .codec
            .encode(&MethodRequest::ping())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.send_text(text).await
    }

    async fn end_session(&self, sink: &mut dyn UpstreamSink, event: TransportEvent) -> SessionEnd {
        match &event {
            TransportEvent::Closed(reason) => {
                tracing::warn!(reason = %reason, "User data stream closed");
            }
            TransportEvent::SendFailed(reason) => {
                tracing::warn!(reason = %reason, "User data stream send failed");
            }
            TransportEvent::Opened | TransportEvent::MessageReceived(_) => {}
        }
        sink.close().await;
        self.apply(ConnectorInput::Transport(event));
        SessionEnd::Failed
    }

    async fn send_pong(
        &self,
        value: serde_json::Value,
        sink: &mut dyn UpstreamSink,
    ) -> Result<(), TransportError> {
        metrics::record_upstream_message(UpstreamMessageKind::Ping);
        let reply = self
            .codec
            .encode(&PongReply { pong: value })
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.send_text(reply).await
    }

    /// Handle one non-ping frame. A channel event returns the snapshot build
    /// it triggered.
    fn dispatch(
        &self,
        message: Result<StreamMessage, CodecError>,
    ) -> Option<BoxFuture<'_, ()>> {
        match message {
            Ok(StreamMessage::Ack(ack)) => {
                metrics::record_upstream_message(UpstreamMessageKind::Ack);
                if ack.is_pong() {
                    tracing::trace!("Pong received");
                } else if ack.is_success() {
                    tracing::info!(msg = %ack.msg, "Subscription confirmed");
                } else {
                    tracing::warn!(code = ack.code, msg = %ack.msg, "Request rejected by exchange");
                }
                None
            }
            Ok(StreamMessage::Event(event)) => {
                metrics::record_upstream_message(UpstreamMessageKind::Event);
                tracing::debug!(channel = %event.channel, "Account event received");
                Some(self.refresh_snapshot().boxed())
            }
            Ok(StreamMessage::Ping(_)) => None,
            Err(e) => {
                metrics::record_upstream_message(UpstreamMessageKind::Invalid);
                tracing::warn!(error = %e, "Failed to decode upstream message");
                self.hub.publish_error(&e.to_string());
                None
            }
        }
    }

    async fn refresh_snapshot(&self) {
        let started = Instant::now();
        match self.builder.build().await {
            Ok(snapshot) => {
                metrics::record_snapshot_build_duration(started.elapsed());
                tracing::debug!(
                    assets = snapshot.len(),
                    quote = self.builder.quote_currency(),
                    "Publishing snapshot"
                );
                self.hub.publish(snapshot);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build snapshot");
                self.hub.publish_error(&e.to_string());
            }
        }
    }
}

impl std::fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnector")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
