use super::{websocket, RelaySubscription, RelayTransport, TransportError};
use crate::types::{RelayReply, RelayRequest};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for provider HTTP transport concurrency.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Maximum number of in-flight relays to this endpoint
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
    /// Upper bound on any single request; the dispatcher applies its own tighter deadline
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 64,
            permit_timeout_ms: 500,
            request_timeout: Duration::from_secs(45),
        }
    }
}

/// Relay transport posting JSON envelopes to `{endpoint}/relay`.
///
/// Subscriptions are opened over WebSocket at `{ws_endpoint}/relay/subscribe`. Requests are
/// never retried here: a retry would be a second relay the session was not charged for.
pub struct HttpRelayTransport {
    client: Client,
    relay_url: String,
    subscribe_url: String,
    concurrent_limit: Arc<Semaphore>,
    config: HttpTransportConfig,
}

/// RAII guard releasing the concurrency permit when the request finishes or is dropped.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "relay permit released"
        );
    }
}

impl HttpRelayTransport {
    /// Creates a transport for the provider endpoint at `endpoint_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the URL is not http(s) or the
    /// underlying reqwest client fails to build.
    pub fn new(endpoint_url: &str, config: HttpTransportConfig) -> Result<Self, TransportError> {
        let base = url::Url::parse(endpoint_url)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid endpoint url: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported endpoint scheme: {}",
                base.scheme()
            )));
        }
        let trimmed = endpoint_url.trim_end_matches('/');

        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("relay-consumer/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TransportError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            relay_url: format!("{trimmed}/relay"),
            subscribe_url: format!("{}/relay/subscribe", websocket::to_ws_url(trimmed)),
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit.max(1))),
            config,
        })
    }

    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    #[must_use]
    pub fn subscribe_url(&self) -> &str {
        &self.subscribe_url
    }

    async fn acquire_permit(&self) -> Result<PermitGuard, TransportError> {
        let permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                url = %self.relay_url,
                available_permits = self.concurrent_limit.available_permits(),
                "relay permit acquisition timeout"
            );
            TransportError::ConcurrencyLimit(self.relay_url.clone())
        })?
        .map_err(|_| TransportError::ConcurrencyLimit(self.relay_url.clone()))?;

        Ok(PermitGuard { _permit: permit, semaphore: Arc::clone(&self.concurrent_limit) })
    }

    /// Sanitizes network errors so provider internals don't leak into client responses.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else {
            "network error".to_string()
        }
    }

    #[cfg(test)]
    fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn relay(&self, request: &RelayRequest) -> Result<RelayReply, TransportError> {
        let _permit = self.acquire_permit().await?;

        let response =
            self.client.post(&self.relay_url).json(request).send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::DeadlineExceeded
                } else {
                    TransportError::ConnectionFailed(Self::sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            let sanitized_text = if raw_text.len() > 256 {
                format!("{}... (truncated)", raw_text.chars().take(256).collect::<String>())
            } else {
                raw_text
            };
            return Err(TransportError::HttpError(status.as_u16(), sanitized_text));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::DeadlineExceeded
            } else {
                TransportError::ConnectionFailed(Self::sanitize_network_error(&e))
            }
        })?;

        serde_json::from_slice(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("malformed relay reply: {e}")))
    }

    async fn relay_subscribe(
        &self,
        request: &RelayRequest,
    ) -> Result<RelaySubscription, TransportError> {
        websocket::subscribe(&self.subscribe_url, request).await
    }
}
