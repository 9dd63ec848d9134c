//! HTTP clients for the market-data and on-chain flow providers.
//!
//! Every outbound request goes through the same path: the provider's shared
//! [`Throttle`], then the request itself, then status classification, with
//! transient failures retried under a [`RetryPolicy`].

pub mod coingecko;
pub mod glassnode;
pub mod retry;
pub mod throttle;

pub use coingecko::CoinGeckoClient;
pub use glassnode::GlassnodeClient;
pub use retry::{with_backoff, RetryPolicy};
pub use throttle::Throttle;

use flow_core::{FlowError, FlowResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Connection settings for one provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Map an HTTP status to an error for the statuses every provider treats
/// the same way. Other statuses are left to the caller.
pub(crate) fn classify_status(provider: &str, status: StatusCode) -> FlowResult<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FlowError::RateLimited(format!("{} returned HTTP 429", provider)));
    }
    if status.is_server_error() {
        return Err(FlowError::Network(format!("{} returned HTTP {}", provider, status)));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FlowError::ProviderUnavailable(format!(
            "{} rejected credentials (HTTP {})",
            provider, status
        )));
    }
    Ok(())
}

/// Throttled, retrying request executor shared by the provider clients
#[derive(Clone)]
pub(crate) struct RequestExecutor {
    provider: &'static str,
    client: Client,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,
}

impl RequestExecutor {
    pub(crate) fn new(provider: &'static str, config: &ProviderConfig, throttle: Arc<Throttle>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            provider,
            client,
            throttle,
            retry: config.retry,
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request with throttling and automatic retry on 429, 5xx and
    /// network errors. Non-transient statuses are returned to the caller.
    pub(crate) async fn send(&self, builder: reqwest::RequestBuilder) -> FlowResult<reqwest::Response> {
        let request = builder
            .build()
            .map_err(|e| FlowError::InvalidData(format!("{} request: {}", self.provider, e)))?;
        let request = &request;
        let this = self;

        with_backoff(&self.retry, self.provider, move || async move {
            let attempt = request.try_clone().ok_or_else(|| {
                FlowError::InvalidData(format!("{} request cannot be cloned", this.provider))
            })?;

            this.throttle.acquire().await;
            let response = this
                .client
                .execute(attempt)
                .await
                .map_err(|e| FlowError::Network(format!("{}: {}", this.provider, e)))?;

            classify_status(this.provider, response.status())?;
            Ok(response)
        })
        .await
    }

    /// `send` and decode a successful JSON body
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> FlowResult<T> {
        let response = self.send(builder).await?;

        if !response.status().is_success() {
            return Err(FlowError::InvalidResponse(format!(
                "{} HTTP {}: {}",
                self.provider,
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FlowError::InvalidResponse(format!("{}: {}", self.provider, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status("p", StatusCode::OK).is_ok());
        assert!(classify_status("p", StatusCode::NOT_FOUND).is_ok());
        assert!(matches!(
            classify_status("p", StatusCode::TOO_MANY_REQUESTS),
            Err(FlowError::RateLimited(_))
        ));
        assert!(matches!(
            classify_status("p", StatusCode::BAD_GATEWAY),
            Err(FlowError::Network(_))
        ));
        assert!(matches!(
            classify_status("p", StatusCode::UNAUTHORIZED),
            Err(FlowError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn test_provider_config_normalizes() {
        let config = ProviderConfig::new("https://example.com/api/").with_api_key(Some("  ".into()));
        assert_eq!(config.base_url, "https://example.com/api");
        assert!(config.api_key.is_none());
    }
}
