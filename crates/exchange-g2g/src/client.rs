//! G2G seller API client with rate limiting and request signing.
//!
//! Implements [`MarketplaceSink`]: offer creation, listing, status,
//! withdrawal, order polling, delivery and cancellation.
//!
//! # Example
//!
//! ```ignore
//! use relist_core::{G2gCredentials, MarketplaceSink};
//! use relist_g2g::{G2gClient, G2gClientConfig};
//!
//! let client = G2gClient::new(
//!     G2gClientConfig::default(),
//!     G2gCredentials::new(api_key, secret, seller_id),
//! )?;
//! let sink_offer_id = client.publish_offer(&content).await?;
//! let orders = client.fetch_orders(None).await?;
//! ```

use crate::auth::G2gSigner;
use crate::error::{from_reqwest, from_status};
use crate::types::{
    id_text, millis, CreateOfferRequest, CreateOfferResponse, DeliveryRequest, OffersResponse,
    OrdersResponse, RawOffer,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use relist_core::{
    AdapterError, DeliveryPayload, G2gConfig, G2gCredentials, MarketplaceSink, OfferContent,
    RemoteOffer, SinkOfferStatus, SinkOrder,
};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// G2G API base URL.
pub const G2G_API_URL: &str = "https://api.g2g.com";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the G2G client.
#[derive(Debug, Clone)]
pub struct G2gClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for G2gClientConfig {
    fn default() -> Self {
        Self {
            base_url: G2G_API_URL.to_string(),
            requests_per_minute: nonzero!(60u32),
            timeout_secs: 30,
        }
    }
}

impl G2gClientConfig {
    /// Builds the client configuration from the `[g2g]` config section.
    #[must_use]
    pub fn from_config(config: &G2gConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            requests_per_minute: NonZeroU32::new(config.requests_per_minute)
                .unwrap_or(nonzero!(1u32)),
            ..Self::default()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// =============================================================================
// Client
// =============================================================================

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// G2G seller API client for one user.
pub struct G2gClient {
    config: G2gClientConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    signer: G2gSigner,
}

impl std::fmt::Debug for G2gClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("G2gClient")
            .field("base_url", &self.config.base_url)
            .field("seller", &self.signer.user_id())
            .finish_non_exhaustive()
    }
}

impl G2gClient {
    /// Creates a client for the given seller credentials.
    ///
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be built.
    pub fn new(config: G2gClientConfig, credentials: G2gCredentials) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::transport(format!("failed to build HTTP client: {e}")))?;

        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(
            config.requests_per_minute,
        )));

        Ok(Self {
            config,
            http,
            rate_limiter,
            signer: G2gSigner::new(credentials),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn validate_identifier(id: &str) -> Result<&str, AdapterError> {
        if id.is_empty() {
            return Err(AdapterError::rejected("identifier cannot be empty"));
        }
        if id.len() > 128 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AdapterError::rejected(format!("invalid identifier: {id}")));
        }
        Ok(id)
    }

    /// Waits for the rate limiter, signs and sends. Status is not checked.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Response, AdapterError> {
        self.rate_limiter.until_ready().await;

        let headers = self.signer.headers(path)?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.http.request(method, url);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        request
            .send()
            .await
            .map_err(|e| from_reqwest(&e, self.config.timeout_secs))
    }

    async fn error_from(&self, response: Response) -> AdapterError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();
        from_status(status, retry_after, &body)
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, AdapterError> {
        if !response.status().is_success() {
            return Err(self.error_from(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| from_reqwest(&e, self.config.timeout_secs))
    }

    async fn expect_success(&self, response: Response) -> Result<(), AdapterError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.error_from(response).await)
        }
    }

    /// Checks that the key pair is accepted.
    ///
    /// # Errors
    /// Returns `Authentication` for refused credentials, or a transport error.
    pub async fn test_connection(&self) -> Result<(), AdapterError> {
        let response = self.execute(Method::GET, "/offers", &[], None).await?;
        self.expect_success(response).await?;
        info!(seller = self.signer.user_id(), "G2G connection ok");
        Ok(())
    }
}

// =============================================================================
// MarketplaceSink
// =============================================================================

#[async_trait]
impl MarketplaceSink for G2gClient {
    async fn publish_offer(&self, content: &OfferContent) -> Result<String, AdapterError> {
        let body = serde_json::to_value(CreateOfferRequest::from_content(content)?)
            .map_err(|e| AdapterError::decode(e.to_string()))?;
        let response = self.execute(Method::POST, "/offers", &[], Some(body)).await?;
        let created: CreateOfferResponse = self.decode(response).await?;

        let sink_offer_id = id_text(&created.offer_id)
            .ok_or_else(|| AdapterError::decode("create offer response without offer_id"))?;
        info!(sink_offer_id, price = %content.destination_price, "created G2G offer");
        Ok(sink_offer_id)
    }

    async fn list_offers(&self) -> Result<Vec<RemoteOffer>, AdapterError> {
        let response = self.execute(Method::GET, "/offers", &[], None).await?;
        let listed: OffersResponse = self.decode(response).await?;

        let offers = listed
            .offers
            .into_iter()
            .filter_map(|raw| match raw.into_remote() {
                Ok(offer) => Some(offer),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable G2G offer");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(count = offers.len(), "listed G2G offers");
        Ok(offers)
    }

    async fn offer_status(&self, sink_offer_id: &str) -> Result<SinkOfferStatus, AdapterError> {
        let id = Self::validate_identifier(sink_offer_id)?;
        let response = self
            .execute(Method::GET, &format!("/offers/{id}"), &[], None)
            .await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(SinkOfferStatus::Missing);
        }
        let raw: RawOffer = self.decode(response).await?;
        Ok(raw.status())
    }

    async fn withdraw_offer(&self, sink_offer_id: &str) -> Result<(), AdapterError> {
        let id = Self::validate_identifier(sink_offer_id)?;
        let response = self
            .execute(Method::DELETE, &format!("/offers/{id}"), &[], None)
            .await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            debug!(sink_offer_id = id, "G2G offer already gone");
            return Ok(());
        }
        self.expect_success(response).await?;
        info!(sink_offer_id = id, "withdrew G2G offer");
        Ok(())
    }

    async fn fetch_orders(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SinkOrder>, AdapterError> {
        let query: Vec<(&str, String)> = since
            .map(|at| vec![("created_after", millis(at))])
            .unwrap_or_default();
        let response = self.execute(Method::GET, "/orders", &query, None).await?;
        let listed: OrdersResponse = self.decode(response).await?;

        let orders = listed
            .orders
            .into_iter()
            .filter_map(|raw| match raw.into_sink_order() {
                Ok(order) => Some(order),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable G2G order");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(count = orders.len(), "fetched G2G orders");
        Ok(orders)
    }

    async fn deliver_order(
        &self,
        sink_order_id: &str,
        payload: &DeliveryPayload,
    ) -> Result<(), AdapterError> {
        let id = Self::validate_identifier(sink_order_id)?;
        let body = serde_json::to_value(DeliveryRequest {
            delivery_data: payload.expose(),
        })
        .map_err(|e| AdapterError::decode(e.to_string()))?;
        let response = self
            .execute(Method::POST, &format!("/orders/{id}/delivery"), &[], Some(body))
            .await?;
        self.expect_success(response).await?;
        info!(sink_order_id = id, "delivered G2G order");
        Ok(())
    }

    async fn cancel_order(&self, sink_order_id: &str) -> Result<(), AdapterError> {
        let id = Self::validate_identifier(sink_order_id)?;
        let response = self
            .execute(Method::POST, &format!("/orders/{id}/cancel"), &[], None)
            .await?;
        self.expect_success(response).await?;
        info!(sink_order_id = id, "cancelled G2G order");
        Ok(())
    }
}
