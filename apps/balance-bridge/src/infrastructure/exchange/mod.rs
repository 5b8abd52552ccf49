//! MEXC Exchange Adapters
//!
//! REST access (signing, listen keys, balances, prices) and the private
//! user-data stream (codec, heartbeat, reconnect, connector).

pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod messages;
pub mod quotes;
pub mod reconnect;
pub mod rest;
pub mod session;
pub mod signer;
pub mod transport;

pub use connector::{ConnectorConfig, StreamConnector};
pub use quotes::RestQuoteSource;
pub use rest::{RestClient, RestError};
pub use session::{SessionKeyManager, SessionKeyRenewer};
pub use signer::Signer;
pub use transport::TungsteniteTransport;
