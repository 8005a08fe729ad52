//! LZT market REST client with rate limiting.
//!
//! Implements [`ListingSource`]: category search, item detail and
//! fast-buy. Every request waits on a governor rate limiter and carries
//! the user's Bearer token.
//!
//! # Example
//!
//! ```ignore
//! use relist_core::{Category, LztCredentials, ListingSource};
//! use relist_lzt::{LztClient, LztClientConfig};
//! use rust_decimal_macros::dec;
//!
//! let client = LztClient::new(LztClientConfig::default(), LztCredentials::new(token))?;
//! client.test_connection().await?;
//!
//! let listings = client
//!     .fetch_listings(Category::Steam, dec!(1), dec!(100))
//!     .await?;
//! println!("found {} items", listings.len());
//! ```

use crate::error::{from_reqwest, from_status};
use crate::types::{decimal, FastBuyResponse, ItemResponse, ItemsResponse};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use relist_core::{
    AdapterError, Category, DeliveryPayload, Listing, ListingSource, LztConfig, LztCredentials,
    PurchaseReceipt,
};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// LZT market API base URL.
pub const LZT_API_URL: &str = "https://api.zelenka.guru";

/// Largest gap between the expected and the current price that still buys.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the LZT client.
#[derive(Debug, Clone)]
pub struct LztClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LztClientConfig {
    fn default() -> Self {
        Self {
            base_url: LZT_API_URL.to_string(),
            requests_per_minute: nonzero!(20u32),
            timeout_secs: 30,
        }
    }
}

impl LztClientConfig {
    /// Builds the client configuration from the `[lzt]` config section.
    #[must_use]
    pub fn from_config(config: &LztConfig) -> Self {
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

/// LZT market API client for one user.
pub struct LztClient {
    config: LztClientConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    credentials: LztCredentials,
}

impl std::fmt::Debug for LztClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LztClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl LztClient {
    /// Creates a client for the given credentials.
    ///
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be built.
    pub fn new(config: LztClientConfig, credentials: LztCredentials) -> Result<Self, AdapterError> {
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
            credentials,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Rejects ids that could escape the intended path segment.
    fn validate_identifier(id: &str) -> Result<&str, AdapterError> {
        if id.is_empty() {
            return Err(AdapterError::rejected("item id cannot be empty"));
        }
        if id.len() > 64 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AdapterError::rejected(format!("invalid item id: {id}")));
        }
        Ok(id)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        self.http
            .request(method, url)
            .bearer_auth(self.credentials.token())
    }

    /// Waits for the rate limiter, sends, and decodes a JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AdapterError> {
        self.rate_limiter.until_ready().await;

        let response = request
            .send()
            .await
            .map_err(|e| from_reqwest(&e, self.config.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(from_status(status, retry_after, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| from_reqwest(&e, self.config.timeout_secs))
    }

    /// Checks that the token is accepted.
    ///
    /// # Errors
    /// Returns `Authentication` for a refused token, or a transport error.
    pub async fn test_connection(&self) -> Result<(), AdapterError> {
        let _: serde_json::Value = self.send(self.request(Method::GET, "/market/me")).await?;
        info!(base_url = %self.config.base_url, "LZT connection ok");
        Ok(())
    }
}

// =============================================================================
// ListingSource
// =============================================================================

#[async_trait]
impl ListingSource for LztClient {
    async fn fetch_listings(
        &self,
        category: Category,
        price_min: Decimal,
        price_max: Decimal,
    ) -> Result<Vec<Listing>, AdapterError> {
        let path = format!("/market/{}", category.slug());
        let request = self.request(Method::GET, &path).query(&[
            ("pmin", price_min.to_string()),
            ("pmax", price_max.to_string()),
        ]);
        let response: ItemsResponse = self.send(request).await?;

        let total = response.items.len();
        let listings: Vec<Listing> = response
            .items
            .into_iter()
            .filter_map(|item| match item.into_listing(category) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!(category = %category, error = %e, "skipping undecodable LZT item");
                    None
                }
            })
            .collect();

        debug!(category = %category, total, kept = listings.len(), "fetched LZT listings");
        Ok(listings)
    }

    async fn fetch_listing_detail(&self, source_id: &str) -> Result<Listing, AdapterError> {
        let source_id = Self::validate_identifier(source_id)?;
        let response: ItemResponse = self
            .send(self.request(Method::GET, &format!("/market/{source_id}")))
            .await?;
        response.item.into_listing_with_own_category()
    }

    async fn purchase_item(
        &self,
        source_id: &str,
        expected_price: Decimal,
    ) -> Result<PurchaseReceipt, AdapterError> {
        let source_id = Self::validate_identifier(source_id)?;

        let detail: ItemResponse = self
            .send(self.request(Method::GET, &format!("/market/{source_id}")))
            .await?;
        let current = decimal(&detail.item.price)
            .ok_or_else(|| AdapterError::decode(format!("item {source_id} has invalid price")))?;
        if (current - expected_price).abs() > PRICE_TOLERANCE {
            return Err(AdapterError::price_changed(expected_price, current));
        }
        let state = detail
            .item
            .extra
            .get("item_state")
            .and_then(|v| v.as_str());
        if matches!(state, Some(s) if s != "active") {
            return Err(AdapterError::OutOfStock);
        }

        let request = self
            .request(Method::POST, &format!("/market/{source_id}/fast-buy"))
            .query(&[("price", current.to_string())]);
        let bought: FastBuyResponse = self.send(request).await?;

        if let Some(status) = bought.status.as_deref() {
            if status != "ok" {
                return Err(AdapterError::rejected(format!("fast-buy status {status}")));
            }
        }
        let payload = bought
            .item
            .login_data
            .and_then(|data| data.into_text())
            .ok_or_else(|| AdapterError::decode(format!("purchase of {source_id} returned no login data")))?;

        info!(source_id, price = %current, "purchased LZT item");
        Ok(PurchaseReceipt {
            purchase_ref: format!("lzt-{source_id}"),
            payload: DeliveryPayload::new(payload),
        })
    }
}
