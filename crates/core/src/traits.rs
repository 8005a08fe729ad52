//! Seams between the engine and the two marketplaces.
//!
//! Implementations never retry; retry and timeout policy belongs to the
//! engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::credentials::{DeliveryPayload, PurchaseReceipt};
use crate::error::AdapterError;
use crate::offer::{OfferContent, RemoteOffer, SinkOfferStatus, SinkOrder};
use crate::types::{Category, Listing};

/// Marketplace where listings are discovered and bought (LZT).
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Lists items of one category priced inside `[price_min, price_max]`.
    async fn fetch_listings(
        &self,
        category: Category,
        price_min: Decimal,
        price_max: Decimal,
    ) -> Result<Vec<Listing>, AdapterError>;

    /// Fetches the full record of a single item.
    async fn fetch_listing_detail(&self, source_id: &str) -> Result<Listing, AdapterError>;

    /// Buys an item, failing with `PriceChanged` if the price moved.
    async fn purchase_item(
        &self,
        source_id: &str,
        expected_price: Decimal,
    ) -> Result<PurchaseReceipt, AdapterError>;
}

/// Marketplace where offers are published and orders fulfilled (G2G).
#[async_trait]
pub trait MarketplaceSink: Send + Sync {
    /// Creates an offer and returns its sink id.
    async fn publish_offer(&self, content: &OfferContent) -> Result<String, AdapterError>;

    /// Lists the seller's current offers.
    async fn list_offers(&self) -> Result<Vec<RemoteOffer>, AdapterError>;

    /// Reports the sink-side status of one offer.
    async fn offer_status(&self, sink_offer_id: &str) -> Result<SinkOfferStatus, AdapterError>;

    /// Removes an offer from sale.
    async fn withdraw_offer(&self, sink_offer_id: &str) -> Result<(), AdapterError>;

    /// Returns orders placed since `since` (all recent orders when `None`).
    async fn fetch_orders(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SinkOrder>, AdapterError>;

    /// Hands the purchased credentials to the buyer.
    async fn deliver_order(
        &self,
        sink_order_id: &str,
        payload: &DeliveryPayload,
    ) -> Result<(), AdapterError>;

    /// Cancels an order that cannot be fulfilled.
    async fn cancel_order(&self, sink_order_id: &str) -> Result<(), AdapterError>;
}
