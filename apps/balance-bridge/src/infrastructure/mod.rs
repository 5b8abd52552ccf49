//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// Task wiring and ordered shutdown.
pub mod coordinator;

/// MEXC REST and user-data stream adapters.
pub mod exchange;

/// Local WebSocket fanout to subscribers.
pub mod fanout;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
