//! Subscriber WebSocket Server
//!
//! Accepts local WebSocket connections on any path and registers each one
//! with the [`BroadcastHub`]. Subscribers are read-only: inbound data frames
//! are ignored, and the connection ends when the client closes it, the hub
//! drops it, or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::hub::{BroadcastHub, FanoutMessage, Subscriber};

/// Time a client has to complete the WebSocket upgrade.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fanout server errors.
#[derive(Debug, thiserror::Error)]
pub enum FanoutServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(String, String),

    /// Failed to read the bound address.
    #[error("failed to read local address: {0}")]
    LocalAddr(String),
}

/// WebSocket endpoint serving snapshots to local subscribers.
pub struct FanoutServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

impl FanoutServer {
    /// Bind `addr` (e.g. `127.0.0.1:8000`).
    ///
    /// # Errors
    ///
    /// Returns `FanoutServerError::BindFailed` if the address is unavailable.
    pub async fn bind(
        addr: &str,
        hub: Arc<BroadcastHub>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Result<Self, FanoutServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FanoutServerError::BindFailed(addr.to_string(), e.to_string()))?;

        Ok(Self {
            listener,
            hub,
            queue_capacity,
            cancel,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, FanoutServerError> {
        self.listener
            .local_addr()
            .map_err(|e| FanoutServerError::LocalAddr(e.to_string()))
    }

    /// Accept connections until cancelled, then wait for open connections
    /// to finish.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "Fanout server listening");
        }

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracker.spawn(serve_connection(
                                stream,
                                peer,
                                Arc::clone(&self.hub),
                                self.queue_capacity,
                                self.cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Fanout server stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    queue_capacity: usize,
    cancel: CancellationToken,
) {
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream));
    let ws = tokio::select! {
        () = cancel.cancelled() => {
            tracing::debug!(%peer, "Shutdown during WebSocket handshake");
            return;
        }
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                tracing::debug!(%peer, error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                tracing::debug!(%peer, "WebSocket handshake timed out");
                return;
            }
        },
    };

    let (subscriber, outbox) = Subscriber::channel(queue_capacity);
    let id = subscriber.id();

    if let Err(e) = hub.register(subscriber) {
        tracing::warn!(%peer, error = %e, "Subscriber dropped during catch-up");
        return;
    }
    tracing::info!(%peer, subscriber = %id, "Subscriber connected");

    pump(ws, outbox, &cancel).await;

    hub.unregister(id);
    tracing::info!(%peer, subscriber = %id, "Subscriber disconnected");
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut outbox: mpsc::Receiver<FanoutMessage>,
    cancel: &CancellationToken,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            message = outbox.recv() => {
                let Some(message) = message else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize fanout message");
                        continue;
                    }
                };
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
