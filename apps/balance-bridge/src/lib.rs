#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Balance Bridge - Account Balance Fanout
//!
//! Keeps one authenticated connection to the MEXC private user-data stream
//! and, whenever the account changes, values every balance in a single quote
//! currency and pushes the snapshot to local WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Valuation rules and state machines
//!   - `balance`: Raw balances, prices, quote-valued snapshots
//!   - `session`: Listen-key session token
//!   - `connector`: Upstream connection lifecycle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Session keys, quote source, upstream transport
//!   - `services`: Snapshot building
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: REST signing, listen keys, stream connector
//!   - `fanout`: Broadcast hub and subscriber WebSocket server
//!   - `config`: Environment configuration
//!   - `coordinator`: Task wiring and shutdown
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! MEXC user-data WS ──► StreamConnector ──► AccountSnapshotBuilder (REST)
//!                                                    │
//!                                                    ▼
//!                                             BroadcastHub ──► Subscriber 1
//!                                                    │   ├───► Subscriber 2
//!                                                    │   └───► Subscriber N
//!                                             latest snapshot (catch-up)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Valuation and lifecycle types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::balance::{Balance, PriceTicker, RawBalance, Snapshot, value_balances};
pub use domain::connector::{ConnectorInput, ConnectorState, TransportEvent};
pub use domain::session::SessionToken;

// Ports and services
pub use application::ports::{
    QuoteSource, QuoteSourceError, SessionKeyProvider, TransportError, UpstreamAuthError,
    UpstreamSink, UpstreamSource, UpstreamTransport,
};
pub use application::services::AccountSnapshotBuilder;

// Infrastructure config
pub use infrastructure::config::{
    BridgeConfig, ConfigError, Credentials, ExchangeSettings, FanoutSettings, ServerSettings,
    SessionSettings, StreamSettings,
};

// Coordinator
pub use infrastructure::coordinator::{Coordinator, CoordinatorError, Upstream};

// Fanout (for integration tests)
pub use infrastructure::fanout::{BroadcastHub, FanoutMessage, FanoutServer, Subscriber};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
