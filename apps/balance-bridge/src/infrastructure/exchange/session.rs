//! Listen-Key Lifecycle
//!
//! [`SessionKeyManager`] acquires and renews the private stream's listen key
//! over REST. [`SessionKeyRenewer`] keeps it alive on a timer, independent of
//! the stream connection.
//!
//! # Endpoints
//!
//! - `POST /api/v3/userDataStream` (signed) → `{"listenKey": "..."}`
//! - `PUT /api/v3/userDataStream` (signed, `listenKey=...`) → `{"listenKey": "..."}`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::rest::{RestClient, RestError};
use crate::application::ports::{SessionKeyProvider, UpstreamAuthError};
use crate::domain::session::SessionToken;
use crate::infrastructure::metrics;

/// Listen-key endpoint path.
pub const USER_DATA_STREAM_PATH: &str = "/api/v3/userDataStream";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

impl From<RestError> for UpstreamAuthError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Status { status, body } => Self::Rejected { status, body },
            RestError::Network(msg) => Self::Request(msg),
            RestError::Decode(msg) => Self::InvalidResponse(msg),
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// REST-backed [`SessionKeyProvider`].
#[derive(Debug)]
pub struct SessionKeyManager {
    rest: Arc<RestClient>,
    current: RwLock<Option<SessionToken>>,
}

impl SessionKeyManager {
    /// Create a manager with no current token.
    #[must_use]
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self {
            rest,
            current: RwLock::new(None),
        }
    }

    /// Apply `update` to the stored token only if it still holds `value`.
    ///
    /// A renewal that completes after a reconnect acquired a newer key must
    /// leave that key alone.
    fn update_if_current(&self, value: &str, update: Option<SessionToken>) -> bool {
        let mut stored = self.current.write();
        if stored.as_ref().is_some_and(|token| token.value() == value) {
            *stored = update;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl SessionKeyProvider for SessionKeyManager {
    async fn acquire(&self) -> Result<SessionToken, UpstreamAuthError> {
        let response: ListenKeyResponse = self
            .rest
            .signed_request(Method::POST, USER_DATA_STREAM_PATH, &[])
            .await?;

        if response.listen_key.is_empty() {
            return Err(UpstreamAuthError::InvalidResponse(
                "empty listenKey".to_string(),
            ));
        }

        let token = SessionToken::new(response.listen_key);
        *self.current.write() = Some(token.clone());
        tracing::info!(token = ?token, "Listen key acquired");
        Ok(token)
    }

    async fn renew(&self, current: &SessionToken) -> Result<SessionToken, UpstreamAuthError> {
        let result = self
            .rest
            .signed_request::<serde_json::Value>(
                Method::PUT,
                USER_DATA_STREAM_PATH,
                &[("listenKey", current.value())],
            )
            .await;

        match result {
            Ok(_) => {
                let renewed = current.extended();
                if self.update_if_current(current.value(), Some(renewed.clone())) {
                    tracing::debug!(token = ?renewed, "Listen key renewed");
                } else {
                    tracing::debug!(token = ?renewed, "Renewed listen key was already replaced");
                }
                Ok(renewed)
            }
            Err(e) => {
                let err = UpstreamAuthError::from(e);
                if err.is_rejection() && !self.update_if_current(current.value(), None) {
                    tracing::debug!(token = ?current, "Rejected listen key was already replaced");
                }
                Err(err)
            }
        }
    }

    fn current(&self) -> Option<SessionToken> {
        self.current.read().clone()
    }
}

// =============================================================================
// Renewer
// =============================================================================

/// Periodic listen-key renewal.
pub struct SessionKeyRenewer {
    provider: Arc<dyn SessionKeyProvider>,
    renew_interval: Duration,
    retry_cooldown: Duration,
    cancel: CancellationToken,
}

impl SessionKeyRenewer {
    /// Create a renewer.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SessionKeyProvider>,
        renew_interval: Duration,
        retry_cooldown: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            renew_interval,
            retry_cooldown,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// Waits a full interval before the first renewal. A failed renewal is
    /// retried after the cooldown instead of the full interval.
    pub async fn run(self) {
        let mut wait = self.renew_interval;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Listen key renewer cancelled");
                    return;
                }
                () = tokio::time::sleep(wait) => {}
            }

            wait = if self.renew_once().await {
                self.renew_interval
            } else {
                self.retry_cooldown
            };
        }
    }

    /// Returns `false` when the renewal should be retried after the cooldown.
    async fn renew_once(&self) -> bool {
        let Some(current) = self.provider.current() else {
            tracing::debug!("No listen key to renew");
            return true;
        };

        match self.provider.renew(&current).await {
            Ok(_) => {
                metrics::record_listen_key_renewal(true);
                true
            }
            Err(e) => {
                metrics::record_listen_key_renewal(false);
                tracing::warn!(
                    error = %e,
                    retry_in_secs = self.retry_cooldown.as_secs(),
                    "Listen key renewal failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::config::Credentials;
    use crate::infrastructure::exchange::rest::API_KEY_HEADER;

    const KEY: &str = "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1";

    fn manager(base_url: &str) -> SessionKeyManager {
        let credentials = Credentials::new("test-key".to_string(), "testsecret".to_string());
        let rest = RestClient::new(base_url, &credentials, Duration::from_secs(5))
            .unwrap()
            .with_timestamp_fn(Arc::new(|| 1_700_000_000_000));
        SessionKeyManager::new(Arc::new(rest))
    }

    #[tokio::test]
    async fn acquire_stores_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(query_param(
                "signature",
                "dd273985d88b32eaeeb19cafcc2dbaa9ac658e274cd4095d474395560c4b09b7",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": KEY})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        assert!(manager.current().is_none());

        let token = manager.acquire().await.unwrap();

        assert_eq!(token.value(), KEY);
        assert_eq!(manager.current().unwrap().value(), KEY);
    }

    #[tokio::test]
    async fn acquire_rejection_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"code":700002,"msg":"Signature for this request is not valid."}"#),
            )
            .mount(&server)
            .await;

        let err = manager(&server.uri()).acquire().await.unwrap_err();
        match err {
            UpstreamAuthError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("700002"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn renew_keeps_value() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(USER_DATA_STREAM_PATH))
            .and(query_param("listenKey", KEY))
            .and(query_param(
                "signature",
                "8b449013808630c1bf866e10b964708e36580dda97021b5dbe761cb2ff9c3e51",
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": KEY})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": KEY})),
            )
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let token = manager.acquire().await.unwrap();

        let renewed = manager.renew(&token).await.unwrap();

        assert_eq!(renewed.value(), KEY);
        assert!(renewed.issued() >= token.issued());
        assert_eq!(manager.current().unwrap().value(), KEY);
    }

    /// Mount a POST that hands out `first` once, then `second`.
    async fn mount_two_keys(server: &MockServer, first: &str, second: &str) {
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": first})),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": second})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn late_renewal_keeps_newer_key() {
        let server = MockServer::start().await;
        mount_two_keys(&server, "key-a", "key-b").await;
        Mock::given(method("PUT"))
            .and(path(USER_DATA_STREAM_PATH))
            .and(query_param("listenKey", "key-a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"listenKey": "key-a"}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let manager = Arc::new(manager(&server.uri()));
        let old = manager.acquire().await.unwrap();
        let renewal = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.renew(&old).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let live = manager.acquire().await.unwrap();
        renewal.await.unwrap().unwrap();

        assert_eq!(live.value(), "key-b");
        assert_eq!(manager.current().unwrap().value(), "key-b");
    }

    #[tokio::test]
    async fn late_rejection_keeps_newer_key() {
        let server = MockServer::start().await;
        mount_two_keys(&server, "key-a", "key-b").await;
        Mock::given(method("PUT"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string("listen key expired")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let manager = Arc::new(manager(&server.uri()));
        let old = manager.acquire().await.unwrap();
        let renewal = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.renew(&old).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.acquire().await.unwrap();
        let err = renewal.await.unwrap().unwrap_err();

        assert!(err.is_rejection());
        assert_eq!(manager.current().unwrap().value(), "key-b");
    }

    #[tokio::test]
    async fn renew_rejection_invalidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listenKey": KEY})),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(USER_DATA_STREAM_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_string("listen key expired"))
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let token = manager.acquire().await.unwrap();

        let err = manager.renew(&token).await.unwrap_err();

        assert!(err.is_rejection());
        assert!(manager.current().is_none());
    }

    struct CountingProvider {
        token: Option<SessionToken>,
        fail: bool,
        renewals: AtomicUsize,
    }

    #[async_trait]
    impl SessionKeyProvider for CountingProvider {
        async fn acquire(&self) -> Result<SessionToken, UpstreamAuthError> {
            unreachable!("renewer never acquires")
        }

        async fn renew(&self, current: &SessionToken) -> Result<SessionToken, UpstreamAuthError> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(UpstreamAuthError::Request("timeout".to_string()))
            } else {
                Ok(current.extended())
            }
        }

        fn current(&self) -> Option<SessionToken> {
            self.token.clone()
        }
    }

    async fn run_renewer(provider: Arc<CountingProvider>, interval: Duration, cooldown: Duration) {
        let cancel = CancellationToken::new();
        let renewer = SessionKeyRenewer::new(provider, interval, cooldown, cancel.clone());
        let handle = tokio::spawn(renewer.run());
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn renews_on_interval() {
        let provider = Arc::new(CountingProvider {
            token: Some(SessionToken::new(KEY)),
            fail: false,
            renewals: AtomicUsize::new(0),
        });

        run_renewer(provider.clone(), Duration::from_millis(100), Duration::from_secs(10)).await;

        let renewals = provider.renewals.load(Ordering::SeqCst);
        assert!((1..=2).contains(&renewals), "renewed {renewals} times");
    }

    #[tokio::test]
    async fn failures_retry_after_cooldown() {
        let provider = Arc::new(CountingProvider {
            token: Some(SessionToken::new(KEY)),
            fail: true,
            renewals: AtomicUsize::new(0),
        });

        run_renewer(provider.clone(), Duration::from_millis(100), Duration::from_millis(30)).await;

        assert!(provider.renewals.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn skips_without_token() {
        let provider = Arc::new(CountingProvider {
            token: None,
            fail: false,
            renewals: AtomicUsize::new(0),
        });

        run_renewer(provider.clone(), Duration::from_millis(20), Duration::from_millis(20)).await;

        assert_eq!(provider.renewals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn renewer_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(CountingProvider {
            token: None,
            fail: false,
            renewals: AtomicUsize::new(0),
        });
        let renewer =
            SessionKeyRenewer::new(provider, Duration::from_secs(60), Duration::from_secs(60), cancel.clone());
        let handle = tokio::spawn(renewer.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "renewer should stop on cancellation");
    }
}
