//! In-memory upstream collaborators shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use balance_bridge::{
    ConnectorState, PriceTicker, QuoteSource, QuoteSourceError, RawBalance, SessionKeyProvider,
    SessionToken, TransportError, TransportEvent, UpstreamAuthError, UpstreamSink, UpstreamSource,
    UpstreamTransport,
};

/// Default wait for anything asynchronous in these tests.
pub const WAIT: Duration = Duration::from_secs(2);

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// =============================================================================
// Session keys
// =============================================================================

/// Hands out `key-1`, `key-2`, ... and can refuse the first N acquisitions.
#[derive(Default)]
pub struct FakeSessionKeys {
    issued: AtomicUsize,
    failures_left: AtomicUsize,
    current: Mutex<Option<SessionToken>>,
}

impl FakeSessionKeys {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionKeyProvider for FakeSessionKeys {
    async fn acquire(&self) -> Result<SessionToken, UpstreamAuthError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(UpstreamAuthError::Rejected {
                status: 401,
                body: "invalid api key".to_string(),
            });
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = SessionToken::new(format!("key-{n}"));
        *self.current.lock() = Some(token.clone());
        Ok(token)
    }

    async fn renew(&self, current: &SessionToken) -> Result<SessionToken, UpstreamAuthError> {
        Ok(current.extended())
    }

    fn current(&self) -> Option<SessionToken> {
        self.current.lock().clone()
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// Serves a fixed balance list and price table, or fails on demand.
pub struct FakeQuotes {
    balances: Mutex<Vec<RawBalance>>,
    prices: Vec<PriceTicker>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl FakeQuotes {
    pub fn new(balances: Vec<RawBalance>, prices: Vec<PriceTicker>) -> Self {
        Self {
            balances: Mutex::new(balances),
            prices,
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// BTC 1.5 and USDT 100 with BTCUSDT at 60000.
    pub fn sample() -> Self {
        Self::new(
            vec![
                RawBalance::new("BTC", dec("1.5"), dec("0")),
                RawBalance::new("USDT", dec("100"), dec("0")),
            ],
            vec![PriceTicker::new("BTCUSDT", dec("60000"))],
        )
    }

    pub fn set_balances(&self, balances: Vec<RawBalance>) {
        *self.balances.lock() = balances;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every balance request for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl QuoteSource for FakeQuotes {
    async fn fetch_balances(&self) -> Result<Vec<RawBalance>, QuoteSourceError> {
        let delay = *self.delay.lock();
        tokio::time::sleep(delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(QuoteSourceError::Status {
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        Ok(self.balances.lock().clone())
    }

    async fn fetch_prices(&self) -> Result<Vec<PriceTicker>, QuoteSourceError> {
        Ok(self.prices.clone())
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Test-side handle on one upstream connection.
pub struct FakeConnection {
    pub url: String,
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
    keepalives: Arc<AtomicUsize>,
}

impl FakeConnection {
    /// Next frame the connector wrote.
    pub async fn next_sent(&mut self) -> String {
        timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("connector dropped the sink")
    }

    /// Deliver a text frame to the connector.
    pub fn push(&self, text: &str) {
        self.inbound
            .send(TransportEvent::MessageReceived(text.to_string()))
            .unwrap();
    }

    /// Drop the connection from the server side.
    pub fn close(&self, reason: &str) {
        let _ = self.inbound.send(TransportEvent::Closed(reason.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Transport-level pings sent so far.
    pub fn keepalives(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }
}

/// Transport whose connections are driven by the test.
pub struct FakeTransport {
    connections: mpsc::UnboundedSender<FakeConnection>,
}

impl FakeTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { connections: tx }, rx)
    }
}

/// Wait for the connector to open its next connection.
pub async fn next_connection(rx: &mut mpsc::UnboundedReceiver<FakeConnection>) -> FakeConnection {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("transport dropped")
}

#[async_trait]
impl UpstreamTransport for FakeTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn UpstreamSink>, Box<dyn UpstreamSource>), TransportError> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let keepalives = Arc::new(AtomicUsize::new(0));

        self.connections
            .send(FakeConnection {
                url: url.to_string(),
                sent: sent_rx,
                inbound: inbound_tx,
                closed: Arc::clone(&closed),
                keepalives: Arc::clone(&keepalives),
            })
            .map_err(|_| TransportError::ConnectFailed("test harness gone".to_string()))?;

        Ok((
            Box::new(FakeSink {
                sent: sent_tx,
                closed,
                keepalives,
            }),
            Box::new(FakeSource { inbound: inbound_rx }),
        ))
    }
}

struct FakeSink {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    keepalives: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent
            .send(text)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeSource {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl UpstreamSource for FakeSource {
    async fn next_event(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed("test dropped connection".to_string()))
    }
}

// =============================================================================
// State helpers
// =============================================================================

/// Wait until the watched connector state satisfies `predicate`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectorState>,
    predicate: impl Fn(ConnectorState) -> bool,
) -> ConnectorState {
    timeout(WAIT, rx.wait_for(|state| predicate(*state)))
        .await
        .expect("timed out waiting for connector state")
        .map(|state| *state)
        .expect("connector dropped")
}
