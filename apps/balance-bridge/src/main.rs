//! Balance Bridge Binary
//!
//! Starts the account balance bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin balance-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MEXC_API_KEY`: MEXC API key
//! - `MEXC_SECRET_KEY`: MEXC API secret
//!
//! ## Optional
//! - `BRIDGE_QUOTE_CURRENCY`: Valuation currency (default: USDT)
//! - `BRIDGE_HOST` / `BRIDGE_PORT`: Subscriber endpoint (default: 127.0.0.1:8000)
//! - `BRIDGE_FANOUT_ENABLED`: Serve local subscribers (default: true)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8082)
//! - `MEXC_REST_URL` / `MEXC_WS_URL`: Exchange endpoints
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use balance_bridge::infrastructure::telemetry;
use balance_bridge::{BridgeConfig, Coordinator, init_metrics};
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Balance Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let coordinator = Coordinator::start(&config).await?;

    tracing::info!("Balance bridge ready");

    await_shutdown().await;

    if !coordinator.shutdown(SHUTDOWN_TIMEOUT).await {
        tracing::warn!("Forced shutdown after timeout");
    }

    tracing::info!("Balance bridge stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        quote_currency = %config.quote_currency,
        fanout_enabled = config.fanout.enabled,
        fanout_addr = %config.fanout.bind_addr(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.exchange.rest_url,
        ws_url = %config.exchange.ws_url,
        renew_interval_secs = config.session.renew_interval.as_secs(),
        ping_interval_secs = config.stream.ping_interval.as_secs(),
        "Exchange endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
