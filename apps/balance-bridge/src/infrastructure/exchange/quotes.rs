//! REST Quote Source
//!
//! [`QuoteSource`] adapter over the exchange REST API:
//!
//! - `GET /api/v3/account` (signed) → `{"balances": [{"asset", "free", "locked"}]}`
//! - `GET /api/v3/ticker/price` → `[{"symbol", "price"}]`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::rest::{RestClient, RestError};
use crate::application::ports::{QuoteSource, QuoteSourceError};
use crate::domain::balance::{PriceTicker, RawBalance};

/// Account endpoint path.
pub const ACCOUNT_PATH: &str = "/api/v3/account";

/// Price ticker endpoint path.
pub const TICKER_PRICE_PATH: &str = "/api/v3/ticker/price";

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balances: Vec<RawBalance>,
}

impl From<RestError> for QuoteSourceError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Network(msg) => Self::Request(msg),
            RestError::Status { status, body } => Self::Status { status, body },
            RestError::Decode(msg) => Self::Malformed(msg),
        }
    }
}

/// Balances and prices fetched over REST.
#[derive(Debug, Clone)]
pub struct RestQuoteSource {
    rest: Arc<RestClient>,
}

impl RestQuoteSource {
    /// Create a quote source sharing `rest`.
    #[must_use]
    pub const fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl QuoteSource for RestQuoteSource {
    async fn fetch_balances(&self) -> Result<Vec<RawBalance>, QuoteSourceError> {
        let account: AccountResponse = self
            .rest
            .signed_request(Method::GET, ACCOUNT_PATH, &[])
            .await?;
        Ok(account.balances)
    }

    async fn fetch_prices(&self) -> Result<Vec<PriceTicker>, QuoteSourceError> {
        Ok(self.rest.public_get(TICKER_PRICE_PATH).await?)
    }
}
