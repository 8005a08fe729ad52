//! Offer and order records owned by the reconciliation engine.
//!
//! # Offer lifecycle
//!
//! ```text
//! Discovered ──► Filtered (terminal)
//!      │
//!      ▼
//!   Priced ──► PublishFailed (terminal)
//!      │
//!      ▼
//!  Published ──► Expired (terminal)
//!      │    └──► Rejected (terminal)
//!      ▼
//!    Sold ──► Fulfilling ──► Fulfilled (terminal)
//!                       └──► Failed (terminal)
//! ```
//!
//! Orders follow `New ──► Fulfilling ──► Delivered | Cancelled | Failed`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::types::{Category, Listing, UserId};

// =============================================================================
// Offer State
// =============================================================================

/// State of an offer in the relisting lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    /// Recorded from a source listing, not yet evaluated.
    Discovered,
    /// Rejected by the filter or pricing engine.
    Filtered,
    /// Content and price computed, waiting for publication.
    Priced,
    /// Publication retries exhausted or sink refused the offer.
    PublishFailed,
    /// Live on the sink marketplace.
    Published,
    /// A buyer ordered it on the sink.
    Sold,
    /// Purchase/delivery in progress.
    Fulfilling,
    /// Credentials delivered to the buyer.
    Fulfilled,
    /// Fulfilment failed; may need operator attention.
    Failed,
    /// Withdrawn after sitting idle past the TTL.
    Expired,
    /// Sink rejected the offer after it was published.
    Rejected,
}

impl OfferState {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Filtered => "filtered",
            Self::Priced => "priced",
            Self::PublishFailed => "publish_failed",
            Self::Published => "published",
            Self::Sold => "sold",
            Self::Fulfilling => "fulfilling",
            Self::Fulfilled => "fulfilled",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filtered
                | Self::PublishFailed
                | Self::Fulfilled
                | Self::Failed
                | Self::Expired
                | Self::Rejected
        )
    }

    /// Returns true if the offer occupies a slot on the sink marketplace.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Published | Self::Sold | Self::Fulfilling)
    }

    /// Returns true if the offer must carry a sink offer id.
    #[must_use]
    pub fn requires_sink_offer_id(self) -> bool {
        matches!(
            self,
            Self::Published | Self::Sold | Self::Fulfilling | Self::Fulfilled
        )
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Discovered, Self::Filtered | Self::Priced)
                | (Self::Priced, Self::Published | Self::PublishFailed)
                | (
                    Self::Published,
                    Self::Sold | Self::Expired | Self::Rejected
                )
                | (Self::Sold, Self::Fulfilling)
                | (Self::Fulfilling, Self::Fulfilled | Self::Failed)
        )
    }
}

impl std::fmt::Display for OfferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown persisted state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for OfferState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "discovered" => Self::Discovered,
            "filtered" => Self::Filtered,
            "priced" => Self::Priced,
            "publish_failed" => Self::PublishFailed,
            "published" => Self::Published,
            "sold" => Self::Sold,
            "fulfilling" => Self::Fulfilling,
            "fulfilled" => Self::Fulfilled,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            "rejected" => Self::Rejected,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}

// =============================================================================
// Offer Content
// =============================================================================

/// Materialized sink offer content produced by the pricing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferContent {
    /// Offer title shown on the sink.
    pub title: String,
    /// Offer description shown on the sink.
    pub description: String,
    /// Marked-up price in USD, 2 decimal places.
    pub destination_price: Decimal,
    /// Sink-side category identifier.
    pub sink_category: String,
}

// =============================================================================
// Offer
// =============================================================================

/// The engine's record of one (possible) republication of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Internal id.
    pub offer_id: Uuid,
    /// Owning user.
    pub user_id: UserId,
    /// Source listing id.
    pub source_id: String,
    /// Sink offer id, set once published.
    pub sink_offer_id: Option<String>,
    /// Listing category.
    pub category: Category,
    /// Source price at discovery time.
    pub source_price: Decimal,
    /// Markup applied when pricing.
    pub markup_percent: u32,
    /// Sink content, set once priced.
    pub content: Option<OfferContent>,
    /// Current lifecycle state.
    pub state: OfferState,
    /// Number of publish attempts made so far.
    pub publish_attempts: u32,
    /// Why the offer ended in a failure state.
    pub failure_reason: Option<String>,
    /// Optimistic concurrency version, bumped on every write.
    pub version: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Creates a freshly discovered offer for a listing.
    #[must_use]
    pub fn discovered(
        user_id: UserId,
        listing: &Listing,
        markup_percent: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            offer_id: Uuid::new_v4(),
            user_id,
            source_id: listing.source_id.clone(),
            sink_offer_id: None,
            category: listing.category,
            source_price: listing.source_price,
            markup_percent,
            content: None,
            state: OfferState::Discovered,
            publish_attempts: 0,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the destination price once priced.
    #[must_use]
    pub fn destination_price(&self) -> Option<Decimal> {
        self.content.as_ref().map(|c| c.destination_price)
    }

    /// Returns true if a remote sink offer looks like the one this offer
    /// would have created (same title, price and category).
    #[must_use]
    pub fn matches_remote(&self, remote: &RemoteOffer) -> bool {
        match &self.content {
            Some(content) => {
                content.title == remote.title
                    && content.destination_price == remote.price
                    && content.sink_category == remote.sink_category
            }
            None => false,
        }
    }
}

// =============================================================================
// Order State
// =============================================================================

/// State of a sink order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Sale detected, fulfilment not started.
    New,
    /// Purchase and/or delivery in progress.
    Fulfilling,
    /// Credentials delivered.
    Delivered,
    /// Cancelled on the sink (nothing was bought).
    Cancelled,
    /// Needs operator attention (item may have been paid for).
    Failed,
}

impl OrderState {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Fulfilling => "fulfilling",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Fulfilling)
                | (
                    Self::Fulfilling,
                    Self::Delivered | Self::Cancelled | Self::Failed
                )
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new" => Self::New,
            "fulfilling" => Self::Fulfilling,
            "delivered" => Self::Delivered,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}

// =============================================================================
// Order
// =============================================================================

/// A sale on the sink marketplace tied to exactly one offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Internal id.
    pub order_id: Uuid,
    /// Owning user.
    pub user_id: UserId,
    /// Sink order id (unique).
    pub sink_order_id: String,
    /// Offer this order bought.
    pub offer_id: Uuid,
    /// Amount the buyer paid on the sink.
    pub amount: Decimal,
    /// Current state.
    pub state: OrderState,
    /// Receipt handle from the source purchase.
    pub purchase_ref: Option<String>,
    /// Number of delivery attempts made so far.
    pub delivery_attempts: u32,
    /// Why the order ended in a failure state.
    pub failure_reason: Option<String>,
    /// Optimistic concurrency version.
    pub version: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order for a detected sale.
    #[must_use]
    pub fn new(offer: &Offer, sale: &SinkOrder, now: DateTime<Utc>) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            user_id: offer.user_id,
            sink_order_id: sale.sink_order_id.clone(),
            offer_id: offer.offer_id,
            amount: sale.amount,
            state: OrderState::New,
            purchase_ref: None,
            delivery_attempts: 0,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Sink-side records
// =============================================================================

/// An order record as reported by the sink marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkOrder {
    /// Sink order id.
    pub sink_order_id: String,
    /// Sink offer the buyer ordered.
    pub sink_offer_id: String,
    /// Amount paid.
    pub amount: Decimal,
    /// When the buyer placed the order, if reported.
    pub created_at: Option<DateTime<Utc>>,
}

/// An offer as listed on the sink marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOffer {
    /// Sink offer id.
    pub sink_offer_id: String,
    /// Title as stored by the sink.
    pub title: String,
    /// Listed price.
    pub price: Decimal,
    /// Sink category identifier.
    pub sink_category: String,
}

/// Sink-side status of a published offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkOfferStatus {
    /// Offer is live.
    Active,
    /// Sink moderation rejected or removed the offer.
    Rejected {
        /// Reason given by the sink, if any.
        reason: String,
    },
    /// Offer no longer exists on the sink.
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn priced_offer() -> Offer {
        let listing = Listing::new("X1", Category::Steam, dec!(20.00));
        let mut offer = Offer::discovered(UserId(1), &listing, 25, Utc::now());
        offer.content = Some(OfferContent {
            title: "Steam account".to_string(),
            description: "desc".to_string(),
            destination_price: dec!(25.00),
            sink_category: "steam".to_string(),
        });
        offer.state = OfferState::Priced;
        offer
    }

    #[test]
    fn test_offer_state_roundtrip() {
        let states = [
            OfferState::Discovered,
            OfferState::Filtered,
            OfferState::Priced,
            OfferState::PublishFailed,
            OfferState::Published,
            OfferState::Sold,
            OfferState::Fulfilling,
            OfferState::Fulfilled,
            OfferState::Failed,
            OfferState::Expired,
            OfferState::Rejected,
        ];
        for state in states {
            assert_eq!(state.as_str().parse::<OfferState>(), Ok(state));
        }
        assert!("bogus".parse::<OfferState>().is_err());
    }

    #[test]
    fn test_offer_terminal_states() {
        assert!(OfferState::Filtered.is_terminal());
        assert!(OfferState::PublishFailed.is_terminal());
        assert!(OfferState::Fulfilled.is_terminal());
        assert!(OfferState::Failed.is_terminal());
        assert!(OfferState::Expired.is_terminal());
        assert!(OfferState::Rejected.is_terminal());
        assert!(!OfferState::Discovered.is_terminal());
        assert!(!OfferState::Published.is_terminal());
        assert!(!OfferState::Fulfilling.is_terminal());
    }

    #[test]
    fn test_offer_legal_transitions() {
        assert!(OfferState::Discovered.can_transition_to(OfferState::Priced));
        assert!(OfferState::Discovered.can_transition_to(OfferState::Filtered));
        assert!(OfferState::Priced.can_transition_to(OfferState::Published));
        assert!(OfferState::Priced.can_transition_to(OfferState::PublishFailed));
        assert!(OfferState::Published.can_transition_to(OfferState::Sold));
        assert!(OfferState::Published.can_transition_to(OfferState::Expired));
        assert!(OfferState::Published.can_transition_to(OfferState::Rejected));
        assert!(OfferState::Sold.can_transition_to(OfferState::Fulfilling));
        assert!(OfferState::Fulfilling.can_transition_to(OfferState::Fulfilled));
        assert!(OfferState::Fulfilling.can_transition_to(OfferState::Failed));
    }

    #[test]
    fn test_offer_illegal_transitions() {
        assert!(!OfferState::Discovered.can_transition_to(OfferState::Published));
        assert!(!OfferState::Published.can_transition_to(OfferState::Priced));
        assert!(!OfferState::Sold.can_transition_to(OfferState::Fulfilled));
        assert!(!OfferState::Fulfilled.can_transition_to(OfferState::Failed));
        assert!(!OfferState::Filtered.can_transition_to(OfferState::Priced));
    }

    #[test]
    fn test_sink_offer_id_requirement() {
        assert!(OfferState::Published.requires_sink_offer_id());
        assert!(OfferState::Fulfilled.requires_sink_offer_id());
        assert!(!OfferState::Priced.requires_sink_offer_id());
        assert!(!OfferState::PublishFailed.requires_sink_offer_id());
    }

    #[test]
    fn test_order_transitions() {
        assert!(OrderState::New.can_transition_to(OrderState::Fulfilling));
        assert!(OrderState::Fulfilling.can_transition_to(OrderState::Delivered));
        assert!(OrderState::Fulfilling.can_transition_to(OrderState::Cancelled));
        assert!(OrderState::Fulfilling.can_transition_to(OrderState::Failed));
        assert!(!OrderState::New.can_transition_to(OrderState::Delivered));
        assert!(!OrderState::Delivered.can_transition_to(OrderState::Cancelled));
        for state in [
            OrderState::New,
            OrderState::Fulfilling,
            OrderState::Delivered,
            OrderState::Cancelled,
            OrderState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<OrderState>(), Ok(state));
        }
    }

    #[test]
    fn test_offer_discovered_defaults() {
        let listing = Listing::new("X9", Category::Valorant, dec!(12.50));
        let offer = Offer::discovered(UserId(7), &listing, 30, Utc::now());

        assert_eq!(offer.state, OfferState::Discovered);
        assert_eq!(offer.source_id, "X9");
        assert_eq!(offer.markup_percent, 30);
        assert!(offer.sink_offer_id.is_none());
        assert!(offer.destination_price().is_none());
        assert_eq!(offer.version, 0);
    }

    #[test]
    fn test_matches_remote_requires_all_fields() {
        let offer = priced_offer();
        let remote = RemoteOffer {
            sink_offer_id: "g2g-1".to_string(),
            title: "Steam account".to_string(),
            price: dec!(25.00),
            sink_category: "steam".to_string(),
        };
        assert!(offer.matches_remote(&remote));

        let other_price = RemoteOffer {
            price: dec!(25.01),
            ..remote.clone()
        };
        assert!(!offer.matches_remote(&other_price));

        let other_category = RemoteOffer {
            sink_category: "valorant".to_string(),
            ..remote
        };
        assert!(!offer.matches_remote(&other_category));
    }

    #[test]
    fn test_order_new_copies_sale() {
        let offer = priced_offer();
        let sale = SinkOrder {
            sink_order_id: "ord-1".to_string(),
            sink_offer_id: "g2g-1".to_string(),
            amount: dec!(25.00),
            created_at: None,
        };
        let order = Order::new(&offer, &sale, Utc::now());
        assert_eq!(order.state, OrderState::New);
        assert_eq!(order.offer_id, offer.offer_id);
        assert_eq!(order.sink_order_id, "ord-1");
        assert_eq!(order.amount, dec!(25.00));
    }
}
