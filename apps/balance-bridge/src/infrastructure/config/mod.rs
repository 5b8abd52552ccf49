//! Configuration Module
//!
//! Configuration loading for the balance bridge.

mod settings;

pub use settings::{
    BridgeConfig, ConfigError, Credentials, DEFAULT_REST_URL, DEFAULT_WS_URL, ExchangeSettings,
    FanoutSettings, ServerSettings, SessionSettings, StreamSettings,
};
