//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SessionKeyProvider`: listen-key acquisition and renewal
//! - `QuoteSource`: account balances and instrument prices
//! - `UpstreamTransport`: the private real-time stream connection

use async_trait::async_trait;

use crate::domain::balance::{PriceTicker, RawBalance};
use crate::domain::connector::TransportEvent;
use crate::domain::session::SessionToken;

// =============================================================================
// Errors
// =============================================================================

/// Listen-key acquisition or renewal failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamAuthError {
    /// The exchange answered with a non-success status.
    #[error("exchange rejected listen key request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the exchange.
        body: String,
    },

    /// The request never completed.
    #[error("listen key request failed: {0}")]
    Request(String),

    /// The response could not be understood.
    #[error("invalid listen key response: {0}")]
    InvalidResponse(String),
}

impl UpstreamAuthError {
    /// Whether the exchange explicitly refused the token.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Account or price retrieval failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QuoteSourceError {
    /// The request never completed.
    #[error("quote source request failed: {0}")]
    Request(String),

    /// The exchange answered with a non-success status.
    #[error("quote source returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body was not in the expected shape.
    #[error("malformed quote source response: {0}")]
    Malformed(String),
}

/// Upstream connection failed, dropped, or refused a write.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

// =============================================================================
// Ports
// =============================================================================

/// Acquires and keeps alive the private stream's listen key.
#[async_trait]
pub trait SessionKeyProvider: Send + Sync {
    /// Obtain a fresh listen key.
    async fn acquire(&self) -> Result<SessionToken, UpstreamAuthError>;

    /// Extend the validity of `current`.
    async fn renew(&self, current: &SessionToken) -> Result<SessionToken, UpstreamAuthError>;

    /// The most recently acquired or renewed token, if still valid.
    fn current(&self) -> Option<SessionToken>;
}

/// Blocking request/response access to account balances and prices.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// The account's raw balance list.
    async fn fetch_balances(&self) -> Result<Vec<RawBalance>, QuoteSourceError>;

    /// The full instrument price table.
    async fn fetch_prices(&self) -> Result<Vec<PriceTicker>, QuoteSourceError>;
}

/// Write half of an upstream connection.
#[async_trait]
pub trait UpstreamSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level ping. Transports without one do nothing.
    async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Read half of an upstream connection.
#[async_trait]
pub trait UpstreamSource: Send {
    /// Wait for the next application frame.
    ///
    /// Returns [`TransportEvent::MessageReceived`] for data and
    /// [`TransportEvent::Closed`] once the connection is gone. Transport
    /// level pings never surface here.
    async fn next_event(&mut self) -> TransportEvent;
}

/// Opens upstream connections.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Connect to `url`, returning the split connection.
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamSource>), TransportError>;
}
