//! Repository contract for offers and orders, plus an in-memory store.
//!
//! # Overview
//!
//! Every state change the engine makes is a single call on [`OfferStore`].
//! Writes are versioned: an update names the version it was computed from
//! and fails with [`StoreError::Conflict`] if another writer got there first.
//! Implementations must enforce:
//!
//! - one offer per `(user_id, source_id)` (insert returns the existing one)
//! - unique non-null `sink_offer_id`
//! - unique `sink_order_id`
//! - at most one non-cancelled order per offer
//!
//! [`MemoryStore`] is the reference implementation used by tests; the SQLite
//! implementation lives in `relist-store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relist_core::{DeliveryPayload, Offer, OfferState, Order, OrderState, UserId};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Stored version differs from the expected one.
    #[error("version conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: Uuid },

    /// Record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// A uniqueness invariant would be violated.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    /// The record was new and is now stored.
    Created(T),
    /// A record with the same idempotency key already existed.
    Existing(T),
}

/// Per-state counters for one user.
pub type StateCounts<S> = HashMap<S, u64>;

// =============================================================================
// Repository Trait
// =============================================================================

#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Inserts the offer unless one exists for `(user_id, source_id)`.
    async fn insert_offer(&self, offer: &Offer) -> Result<Inserted<Offer>, StoreError>;

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>, StoreError>;

    /// All offers of `user_id` carrying `sink_offer_id`.
    async fn offers_by_sink_id(
        &self,
        user_id: UserId,
        sink_offer_id: &str,
    ) -> Result<Vec<Offer>, StoreError>;

    async fn offers_in_state(
        &self,
        user_id: UserId,
        state: OfferState,
    ) -> Result<Vec<Offer>, StoreError>;

    async fn count_offers(&self, user_id: UserId) -> Result<StateCounts<OfferState>, StoreError>;

    /// Writes `offer` if the stored version equals `expected_version`.
    /// Returns the offer with its new version.
    async fn update_offer(&self, offer: &Offer, expected_version: i64) -> Result<Offer, StoreError>;

    /// Inserts a new order and writes the (sold) offer in one transaction.
    /// Returns the existing order if `sink_order_id` was already recorded.
    async fn record_sale(
        &self,
        order: &Order,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<Inserted<Order>, StoreError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn order_by_sink_id(&self, sink_order_id: &str) -> Result<Option<Order>, StoreError>;

    async fn orders_in_state(
        &self,
        user_id: UserId,
        state: OrderState,
    ) -> Result<Vec<Order>, StoreError>;

    async fn count_orders(&self, user_id: UserId) -> Result<StateCounts<OrderState>, StoreError>;

    /// Writes an order and its offer in one transaction.
    async fn update_order_and_offer(
        &self,
        order: &Order,
        expected_order_version: i64,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<(Order, Offer), StoreError>;

    /// Writes an order together with the purchased delivery payload.
    async fn store_purchase(
        &self,
        order: &Order,
        expected_version: i64,
        payload: &DeliveryPayload,
    ) -> Result<Order, StoreError>;

    async fn delivery_payload(&self, order_id: Uuid) -> Result<Option<DeliveryPayload>, StoreError>;

    /// Timestamp of the last successful order sync.
    async fn sync_cursor(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn set_sync_cursor(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
struct Inner {
    offers: HashMap<Uuid, Offer>,
    orders: HashMap<Uuid, Order>,
    payloads: HashMap<Uuid, DeliveryPayload>,
    cursors: HashMap<UserId, DateTime<Utc>>,
}

impl Inner {
    fn check_offer_version(&self, offer: &Offer, expected: i64) -> Result<(), StoreError> {
        let stored = self.offers.get(&offer.offer_id).ok_or(StoreError::NotFound {
            entity: "offer",
            id: offer.offer_id,
        })?;
        if stored.version != expected {
            return Err(StoreError::Conflict {
                entity: "offer",
                id: offer.offer_id,
            });
        }
        if let Some(sink_id) = &offer.sink_offer_id {
            let taken = self.offers.values().any(|o| {
                o.offer_id != offer.offer_id && o.sink_offer_id.as_deref() == Some(sink_id.as_str())
            });
            if taken {
                return Err(StoreError::integrity(format!(
                    "sink offer {sink_id} already owned by another offer"
                )));
            }
        }
        Ok(())
    }

    fn check_order_version(&self, order: &Order, expected: i64) -> Result<(), StoreError> {
        let stored = self.orders.get(&order.order_id).ok_or(StoreError::NotFound {
            entity: "order",
            id: order.order_id,
        })?;
        if stored.version != expected {
            return Err(StoreError::Conflict {
                entity: "order",
                id: order.order_id,
            });
        }
        Ok(())
    }

    fn put_offer(&mut self, offer: &Offer, expected: i64) -> Offer {
        let mut saved = offer.clone();
        saved.version = expected + 1;
        self.offers.insert(saved.offer_id, saved.clone());
        saved
    }

    fn put_order(&mut self, order: &Order, expected: i64) -> Order {
        let mut saved = order.clone();
        saved.version = expected + 1;
        self.orders.insert(saved.order_id, saved.clone());
        saved
    }
}

/// Mutex-guarded store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored offer, for assertions.
    #[must_use]
    pub fn all_offers(&self) -> Vec<Offer> {
        self.inner.lock().offers.values().cloned().collect()
    }

    /// Every stored order, for assertions.
    #[must_use]
    pub fn all_orders(&self) -> Vec<Order> {
        self.inner.lock().orders.values().cloned().collect()
    }
}

fn tally<S: std::hash::Hash + Eq>(states: impl Iterator<Item = S>) -> StateCounts<S> {
    let mut counts = HashMap::new();
    for state in states {
        *counts.entry(state).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn insert_offer(&self, offer: &Offer) -> Result<Inserted<Offer>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .offers
            .values()
            .filter(|o| o.user_id == offer.user_id && o.source_id == offer.source_id)
            .max_by_key(|o| o.created_at)
        {
            return Ok(Inserted::Existing(existing.clone()));
        }
        inner.offers.insert(offer.offer_id, offer.clone());
        Ok(Inserted::Created(offer.clone()))
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(self.inner.lock().offers.get(&offer_id).cloned())
    }

    async fn offers_by_sink_id(
        &self,
        user_id: UserId,
        sink_offer_id: &str,
    ) -> Result<Vec<Offer>, StoreError> {
        Ok(self
            .inner
            .lock()
            .offers
            .values()
            .filter(|o| o.user_id == user_id && o.sink_offer_id.as_deref() == Some(sink_offer_id))
            .cloned()
            .collect())
    }

    async fn offers_in_state(
        &self,
        user_id: UserId,
        state: OfferState,
    ) -> Result<Vec<Offer>, StoreError> {
        let mut offers: Vec<Offer> = self
            .inner
            .lock()
            .offers
            .values()
            .filter(|o| o.user_id == user_id && o.state == state)
            .cloned()
            .collect();
        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn count_offers(&self, user_id: UserId) -> Result<StateCounts<OfferState>, StoreError> {
        let inner = self.inner.lock();
        Ok(tally(
            inner.offers.values().filter(|o| o.user_id == user_id).map(|o| o.state),
        ))
    }

    async fn update_offer(&self, offer: &Offer, expected_version: i64) -> Result<Offer, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_offer_version(offer, expected_version)?;
        Ok(inner.put_offer(offer, expected_version))
    }

    async fn record_sale(
        &self,
        order: &Order,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<Inserted<Order>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .orders
            .values()
            .find(|o| o.sink_order_id == order.sink_order_id)
        {
            return Ok(Inserted::Existing(existing.clone()));
        }
        let has_live_order = order.state != OrderState::Cancelled
            && inner
                .orders
                .values()
                .any(|o| o.offer_id == order.offer_id && o.state != OrderState::Cancelled);
        if has_live_order {
            return Err(StoreError::integrity(format!(
                "offer {} already has an open order",
                order.offer_id
            )));
        }
        inner.check_offer_version(offer, expected_offer_version)?;
        inner.put_offer(offer, expected_offer_version);
        inner.orders.insert(order.order_id, order.clone());
        Ok(Inserted::Created(order.clone()))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().orders.get(&order_id).cloned())
    }

    async fn order_by_sink_id(&self, sink_order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .inner
            .lock()
            .orders
            .values()
            .find(|o| o.sink_order_id == sink_order_id)
            .cloned())
    }

    async fn orders_in_state(
        &self,
        user_id: UserId,
        state: OrderState,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .inner
            .lock()
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.state == state)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn count_orders(&self, user_id: UserId) -> Result<StateCounts<OrderState>, StoreError> {
        let inner = self.inner.lock();
        Ok(tally(
            inner.orders.values().filter(|o| o.user_id == user_id).map(|o| o.state),
        ))
    }

    async fn update_order_and_offer(
        &self,
        order: &Order,
        expected_order_version: i64,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<(Order, Offer), StoreError> {
        let mut inner = self.inner.lock();
        inner.check_order_version(order, expected_order_version)?;
        inner.check_offer_version(offer, expected_offer_version)?;
        let order = inner.put_order(order, expected_order_version);
        let offer = inner.put_offer(offer, expected_offer_version);
        Ok((order, offer))
    }

    async fn store_purchase(
        &self,
        order: &Order,
        expected_version: i64,
        payload: &DeliveryPayload,
    ) -> Result<Order, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_order_version(order, expected_version)?;
        inner.payloads.insert(order.order_id, payload.clone());
        Ok(inner.put_order(order, expected_version))
    }

    async fn delivery_payload(&self, order_id: Uuid) -> Result<Option<DeliveryPayload>, StoreError> {
        Ok(self.inner.lock().payloads.get(&order_id).cloned())
    }

    async fn sync_cursor(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.inner.lock().cursors.get(&user_id).copied())
    }

    async fn set_sync_cursor(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.lock().cursors.insert(user_id, at);
        Ok(())
    }
}
