//! Bridge Configuration Settings
//!
//! Configuration types for the balance bridge, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::exchange::messages::ACCOUNT_CHANNEL;

/// Default REST base URL.
pub const DEFAULT_REST_URL: &str = "https://api.mexc.com";

/// Default user-data stream URL (the listen key is appended as a query).
pub const DEFAULT_WS_URL: &str = "wss://wbs.mexc.com/ws";

/// MEXC API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the secret key.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Exchange endpoints.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// REST base URL.
    pub rest_url: String,
    /// User-data stream base URL.
    pub ws_url: String,
    /// Private channels subscribed after connecting.
    pub stream_channels: Vec<String>,
    /// Timeout applied to every REST request.
    pub rest_timeout: Duration,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            stream_channels: vec![ACCOUNT_CHANNEL.to_string()],
            rest_timeout: Duration::from_secs(5),
        }
    }
}

/// Listen-key renewal settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Interval between renewals.
    pub renew_interval: Duration,
    /// Wait before retrying a failed renewal.
    pub retry_cooldown: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            renew_interval: Duration::from_secs(30 * 60),
            retry_cooldown: Duration::from_secs(60),
        }
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Interval between `PING` requests.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before reconnecting.
    pub pong_timeout: Duration,
    /// Interval between WebSocket protocol pings; zero disables them.
    pub transport_ping_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier (`1.0` keeps the delay fixed).
    pub reconnect_delay_multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.0 - 1.0).
    pub reconnect_jitter: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(60),
            transport_ping_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(1),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
        }
    }
}

/// Local subscriber endpoint settings.
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Whether the subscriber endpoint is served at all.
    pub enabled: bool,
    /// Per-subscriber outbox capacity.
    pub subscriber_queue_capacity: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            enabled: true,
            subscriber_queue_capacity: 64,
        }
    }
}

impl FanoutSettings {
    /// `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Asset every balance is valued in.
    pub quote_currency: String,
    /// Exchange endpoints.
    pub exchange: ExchangeSettings,
    /// Listen-key renewal settings.
    pub session: SessionSettings,
    /// Upstream connection settings.
    pub stream: StreamSettings,
    /// Subscriber endpoint settings.
    pub fanout: FanoutSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Create configuration with defaults for everything but credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            quote_currency: "USDT".to_string(),
            exchange: ExchangeSettings::default(),
            session: SessionSettings::default(),
            stream: StreamSettings::default(),
            fanout: FanoutSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// Unparseable optional values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(&lookup, "MEXC_API_KEY")?;
        let secret_key = required(&lookup, "MEXC_SECRET_KEY")?;

        let env = EnvReader { lookup: &lookup };

        let quote_currency = env
            .string("BRIDGE_QUOTE_CURRENCY")
            .map_or_else(|| "USDT".to_string(), |s| s.to_uppercase());

        let exchange_defaults = ExchangeSettings::default();
        let exchange = ExchangeSettings {
            rest_url: env
                .string("MEXC_REST_URL")
                .map_or(exchange_defaults.rest_url, |s| {
                    s.trim_end_matches('/').to_string()
                }),
            ws_url: env
                .string("MEXC_WS_URL")
                .unwrap_or(exchange_defaults.ws_url),
            stream_channels: env
                .list("MEXC_STREAM_CHANNELS")
                .unwrap_or(exchange_defaults.stream_channels),
            rest_timeout: env.duration_secs(
                "BRIDGE_REST_TIMEOUT_SECS",
                exchange_defaults.rest_timeout,
            ),
        };

        let session = SessionSettings {
            renew_interval: env.duration_secs(
                "BRIDGE_LISTEN_KEY_RENEW_INTERVAL_SECS",
                SessionSettings::default().renew_interval,
            ),
            retry_cooldown: env.duration_secs(
                "BRIDGE_LISTEN_KEY_RETRY_COOLDOWN_SECS",
                SessionSettings::default().retry_cooldown,
            ),
        };

        let stream = StreamSettings {
            ping_interval: env.duration_secs(
                "BRIDGE_PING_INTERVAL_SECS",
                StreamSettings::default().ping_interval,
            ),
            pong_timeout: env.duration_secs(
                "BRIDGE_PONG_TIMEOUT_SECS",
                StreamSettings::default().pong_timeout,
            ),
            transport_ping_interval: env.duration_secs(
                "BRIDGE_TRANSPORT_PING_INTERVAL_SECS",
                StreamSettings::default().transport_ping_interval,
            ),
            reconnect_delay_initial: env.duration_millis(
                "BRIDGE_RECONNECT_DELAY_MS",
                StreamSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "BRIDGE_RECONNECT_DELAY_MAX_SECS",
                StreamSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "BRIDGE_RECONNECT_DELAY_MULTIPLIER",
                StreamSettings::default().reconnect_delay_multiplier,
            ),
            reconnect_jitter: env
                .parse(
                    "BRIDGE_RECONNECT_JITTER",
                    StreamSettings::default().reconnect_jitter,
                )
                .clamp(0.0, 1.0),
        };

        let fanout = FanoutSettings {
            host: env
                .string("BRIDGE_HOST")
                .unwrap_or_else(|| FanoutSettings::default().host),
            port: env.parse("BRIDGE_PORT", FanoutSettings::default().port),
            enabled: env.flag("BRIDGE_FANOUT_ENABLED", FanoutSettings::default().enabled),
            subscriber_queue_capacity: env
                .parse::<usize>(
                    "BRIDGE_SUBSCRIBER_QUEUE_CAPACITY",
                    FanoutSettings::default().subscriber_queue_capacity,
                )
                .max(1),
        };

        let server = ServerSettings {
            health_port: env.parse("BRIDGE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            credentials: Credentials::new(api_key, secret_key),
            quote_currency,
            exchange,
            session,
            stream,
            fanout,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key).map(|v| v.to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .string(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
