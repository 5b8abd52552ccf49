//! MEXC REST Client
//!
//! Thin HTTP wrapper shared by the listen-key manager and the quote source.
//!
//! Signed requests carry the API key in the `X-MEXC-APIKEY` header and a
//! query string of the form `timestamp=<ms>[&k=v...]&signature=<hex>`, where
//! the signature covers everything before `&signature`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use super::signer::Signer;
use crate::infrastructure::config::Credentials;

/// API key header name.
pub const API_KEY_HEADER: &str = "X-MEXC-APIKEY";

/// Millisecond clock used for request timestamps.
pub type TimestampFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// REST request errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    /// The request could not be sent or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// The exchange answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// HTTP client for the exchange REST API.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    api_key: String,
    signer: Signer,
    timestamp_fn: TimestampFn,
}

impl RestClient {
    /// Create a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: credentials.api_key().to_string(),
            signer: Signer::new(credentials.secret_key()),
            timestamp_fn: Arc::new(now_ms),
        })
    }

    /// Replace the request clock.
    #[must_use]
    pub fn with_timestamp_fn(mut self, timestamp_fn: TimestampFn) -> Self {
        self.timestamp_fn = timestamp_fn;
        self
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the signed query string for `params`.
    ///
    /// The timestamp goes first, then `params` in the given order.
    #[must_use]
    pub fn signed_query(&self, params: &[(&str, &str)]) -> String {
        let mut query = format!("timestamp={}", (self.timestamp_fn)());
        for (key, value) in params {
            query.push('&');
            query.push_str(key);
            query.push('=');
            query.push_str(value);
        }
        let signature = self.signer.sign(&query);
        format!("{query}&signature={signature}")
    }

    /// Send a signed request and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Status` for non-2xx answers, `RestError::Network`
    /// for transport failures, and `RestError::Decode` for bad bodies.
    pub async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, RestError> {
        let url = format!("{}{path}?{}", self.base_url, self.signed_query(params));
        let request = self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key);
        Self::execute(request).await
    }

    /// Send an unauthenticated GET and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Same as [`RestClient::signed_request`].
    pub async fn public_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let url = format!("{}{path}", self.base_url);
        Self::execute(self.http.get(url)).await
    }

    async fn execute<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<T, RestError> {
        let response = request
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RestError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
