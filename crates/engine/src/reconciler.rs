//! Offer and order lifecycle reconciliation.
//!
//! This module drives every listing from discovery to fulfilment across two
//! unreliable marketplaces.
//!
//! # Overview
//!
//! The reconciler:
//! 1. Records discovered listings idempotently per `(user_id, source_id)`
//! 2. Filters and prices them into sink offer content
//! 3. Publishes with retry, adopting orphan offers left by lost responses
//! 4. Turns sink orders into sales exactly once per `sink_order_id`
//! 5. Buys the source item and delivers its credentials to the buyer
//! 6. Resumes work interrupted by a crash, expires idle offers and audits
//!    published ones
//!
//! Every transition is one versioned store write. On a version conflict the
//! record is re-read and the write retried only if the from-state still holds.
//!
//! # Example
//!
//! ```ignore
//! use relist_engine::{MemoryStore, Reconciler};
//!
//! let reconciler = Reconciler::new(Arc::new(MemoryStore::new()));
//! let mut events = reconciler.subscribe();
//!
//! let outcome = reconciler
//!     .process_listing(&listing, &settings, &sink, Utc::now())
//!     .await?;
//! ```

use chrono::{DateTime, Utc};
use relist_core::{
    AdapterError, DeliveryPayload, EngineConfig, EngineEvent, FailureClass, Listing, ListingSource,
    MarketplaceSink, Offer, OfferState, Order, OrderState, RemoteOffer, SinkOfferStatus, SinkOrder,
    UserId, UserSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::filter::{FilterDecision, FilterEngine};
use crate::pricing::{recover_source_price, PricingEngine};
use crate::retry::{retry, with_timeout, RetryFailure, RetryPolicy};
use crate::stats::{self, OfferStats, OrderStats};
use crate::store::{Inserted, OfferStore, StoreError};

/// How often a conflicting write is re-read and retried.
const MAX_CONFLICT_RETRIES: usize = 3;

// =============================================================================
// Configuration
// =============================================================================

/// Retry, timeout and expiry settings of the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub retry: RetryPolicy,
    pub adapter_timeout: Duration,
    pub offer_ttl: chrono::Duration,
    pub event_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_engine_config(&EngineConfig::default())
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            adapter_timeout: config.adapter_timeout(),
            offer_ttl: chrono::Duration::seconds(
                i64::try_from(config.offer_ttl_secs).unwrap_or(i64::MAX / 1000),
            ),
            event_capacity: config.event_capacity.max(1),
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of [`Reconciler::discover`].
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    /// A new offer was recorded.
    Created(Offer),
    /// An offer for this listing already existed.
    Duplicate(Offer),
}

/// Result of [`Reconciler::process_listing`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListingOutcome {
    Duplicate(Offer),
    Filtered(Offer),
    Published(Offer),
    /// Priced but held back by the tier limit.
    Deferred(Offer),
    PublishFailed(Offer),
}

impl ListingOutcome {
    #[must_use]
    pub fn offer(&self) -> &Offer {
        match self {
            Self::Duplicate(o)
            | Self::Filtered(o)
            | Self::Published(o)
            | Self::Deferred(o)
            | Self::PublishFailed(o) => o,
        }
    }
}

/// Result of [`Reconciler::record_sale`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaleOutcome {
    Recorded(Order),
    Duplicate(Order),
    /// No offer carries the sale's sink offer id.
    Unmatched,
    /// The offer was no longer for sale; the order is stored `Cancelled`
    /// and a cancel was sent to the sink.
    Refused(Order),
}

/// Counters from a resume pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub reevaluated: usize,
    pub published: usize,
    pub fulfilled: usize,
    pub redelivered: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Counters from an audit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub checked: usize,
    pub rejected: usize,
    pub missing: usize,
    pub errors: usize,
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct Reconciler {
    store: Arc<dyn OfferStore>,
    filter: FilterEngine,
    pricing: PricingEngine,
    config: ReconcilerConfig,
    events: broadcast::Sender<EngineEvent>,
}

impl Reconciler {
    /// Creates a reconciler with default formatters and policy.
    #[must_use]
    pub fn new(store: Arc<dyn OfferStore>) -> Self {
        let config = ReconcilerConfig::default();
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            store,
            filter: FilterEngine::new(),
            pricing: PricingEngine::default(),
            config,
            events,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        if config.event_capacity != self.config.event_capacity {
            self.events = broadcast::channel(config.event_capacity).0;
        }
        self.config = config;
        self
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Sender half, for components that publish on the same channel.
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn OfferStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Listings rejected so far because of malformed timestamps.
    #[must_use]
    pub fn filter_errors(&self) -> u64 {
        self.filter.filter_errors()
    }

    // =========================================================================
    // Discovery and publication
    // =========================================================================

    /// Records a listing for the settings' user unless it is already known.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn discover(&self, listing: &Listing, settings: &UserSettings) -> Result<Discovery> {
        let offer = Offer::discovered(
            settings.user_id,
            listing,
            settings.markup_percent(),
            Utc::now(),
        );

        match self.store.insert_offer(&offer).await? {
            Inserted::Created(offer) => {
                info!(
                    user_id = %offer.user_id,
                    offer_id = %offer.offer_id,
                    source_id = %offer.source_id,
                    category = %offer.category,
                    price = %offer.source_price,
                    "offer discovered"
                );
                Ok(Discovery::Created(offer))
            }
            Inserted::Existing(offer) => {
                debug!(
                    user_id = %offer.user_id,
                    source_id = %offer.source_id,
                    state = %offer.state,
                    "listing already known"
                );
                Ok(Discovery::Duplicate(offer))
            }
        }
    }

    /// Filters and prices a discovered offer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] unless the offer is
    /// `Discovered`, or a store error.
    pub async fn evaluate(
        &self,
        offer: &Offer,
        listing: &Listing,
        settings: &UserSettings,
        now: DateTime<Utc>,
    ) -> Result<Offer> {
        if offer.state != OfferState::Discovered {
            return Err(EngineError::invalid_transition(
                "offer",
                offer.offer_id,
                offer.state,
                OfferState::Priced,
            ));
        }

        if let FilterDecision::Rejected(rejection) = self.filter.decide(listing, settings, now) {
            let reason = rejection.to_string();
            return self
                .write_offer(offer, OfferState::Filtered, move |o| {
                    o.failure_reason = Some(reason.clone());
                })
                .await;
        }

        match self.pricing.materialize(listing, offer.markup_percent) {
            Some(content) => {
                let source_price = listing.source_price;
                self.write_offer(offer, OfferState::Priced, move |o| {
                    o.source_price = source_price;
                    o.content = Some(content.clone());
                })
                .await
            }
            None => {
                let reason = format!("no formatter for category {}", offer.category);
                self.write_offer(offer, OfferState::Filtered, move |o| {
                    o.failure_reason = Some(reason.clone());
                })
                .await
            }
        }
    }

    /// Returns true if the user may have another live offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn has_capacity(&self, settings: &UserSettings) -> Result<bool> {
        let counts = self.store.count_offers(settings.user_id).await?;
        let live: u64 = counts
            .iter()
            .filter(|(state, _)| state.is_live())
            .map(|(_, n)| *n)
            .sum();
        Ok(live < u64::from(settings.offer_limit()))
    }

    /// Publishes a priced offer, retrying transient failures and adopting
    /// an orphan sink offer instead of creating a second one.
    ///
    /// Returns the offer in `Published` or `PublishFailed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the offer is not `Priced`, if the store fails, if
    /// the sink offer id is already owned, or if the sink could not be
    /// listed before a re-attempt (the offer then stays `Priced`).
    pub async fn publish(&self, offer: &Offer, sink: &dyn MarketplaceSink) -> Result<Offer> {
        if offer.state != OfferState::Priced {
            return Err(EngineError::invalid_transition(
                "offer",
                offer.offer_id,
                offer.state,
                OfferState::Published,
            ));
        }
        let content = offer
            .content
            .clone()
            .ok_or_else(|| EngineError::data_integrity(format!("priced offer {} has no content", offer.offer_id)))?;

        let policy = self.config.retry;
        let mut current = offer.clone();
        let mut check_orphans = current.publish_attempts > 0;
        let mut listing_failures = 0;

        loop {
            if check_orphans {
                match self.find_orphan(&current, sink).await {
                    Ok(Some(sink_offer_id)) => {
                        info!(
                            user_id = %current.user_id,
                            offer_id = %current.offer_id,
                            sink_offer_id = %sink_offer_id,
                            "adopting orphan sink offer"
                        );
                        return self.mark_published(&current, sink_offer_id).await;
                    }
                    Ok(None) => {}
                    Err(EngineError::Adapter(err)) => {
                        listing_failures += 1;
                        if listing_failures >= policy.max_attempts {
                            warn!(
                                offer_id = %current.offer_id,
                                error = %err,
                                "cannot list sink offers, leaving offer priced"
                            );
                            return Err(EngineError::Adapter(err));
                        }
                        tokio::time::sleep(policy.delay_for(listing_failures, &err)).await;
                        continue;
                    }
                    Err(other) => return Err(other),
                }
            }

            if current.publish_attempts >= policy.max_attempts {
                return self
                    .write_offer(&current, OfferState::PublishFailed, |o| {
                        o.failure_reason = Some("publish retries exhausted".to_string());
                    })
                    .await;
            }

            current = self
                .write_offer(&current, OfferState::Priced, |o| o.publish_attempts += 1)
                .await?;
            let attempt = current.publish_attempts;

            let err = match with_timeout(self.config.adapter_timeout, sink.publish_offer(&content)).await {
                Ok(sink_offer_id) => return self.mark_published(&current, sink_offer_id).await,
                Err(err) => err,
            };

            let class = err.classify();
            if class == FailureClass::Terminal || attempt >= policy.max_attempts {
                if class == FailureClass::Retryable {
                    if let Ok(Some(sink_offer_id)) = self.find_orphan(&current, sink).await {
                        return self.mark_published(&current, sink_offer_id).await;
                    }
                }
                warn!(
                    user_id = %current.user_id,
                    offer_id = %current.offer_id,
                    attempt,
                    error = %err,
                    "publish failed"
                );
                let reason = if class == FailureClass::Terminal {
                    format!("sink rejected offer: {err}")
                } else {
                    format!("publish retries exhausted: {err}")
                };
                return self
                    .write_offer(&current, OfferState::PublishFailed, move |o| {
                        o.failure_reason = Some(reason.clone());
                    })
                    .await;
            }

            let delay = policy.delay_for(attempt, &err);
            warn!(
                offer_id = %current.offer_id,
                attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "publish failed, retrying"
            );
            check_orphans = class == FailureClass::Retryable;
            tokio::time::sleep(delay).await;
        }
    }

    /// Discovers, evaluates and publishes one listing, in that order.
    ///
    /// # Errors
    ///
    /// Propagates store and integrity errors.
    pub async fn process_listing(
        &self,
        listing: &Listing,
        settings: &UserSettings,
        sink: &dyn MarketplaceSink,
        now: DateTime<Utc>,
    ) -> Result<ListingOutcome> {
        match self.discover(listing, settings).await? {
            Discovery::Created(offer) => {
                self.advance_discovered(&offer, listing, settings, sink, now)
                    .await
            }
            Discovery::Duplicate(offer) => Ok(ListingOutcome::Duplicate(offer)),
        }
    }

    /// Evaluates a freshly discovered offer against `listing` (usually the
    /// full item record) and publishes it if it passes and the tier allows.
    ///
    /// # Errors
    ///
    /// Propagates store and integrity errors.
    pub async fn advance_discovered(
        &self,
        offer: &Offer,
        listing: &Listing,
        settings: &UserSettings,
        sink: &dyn MarketplaceSink,
        now: DateTime<Utc>,
    ) -> Result<ListingOutcome> {
        let offer = self.evaluate(offer, listing, settings, now).await?;
        if offer.state == OfferState::Filtered {
            return Ok(ListingOutcome::Filtered(offer));
        }

        if !self.has_capacity(settings).await? {
            info!(
                user_id = %offer.user_id,
                offer_id = %offer.offer_id,
                limit = settings.offer_limit(),
                "tier limit reached, offer stays priced"
            );
            return Ok(ListingOutcome::Deferred(offer));
        }

        let offer = self.publish(&offer, sink).await?;
        Ok(match offer.state {
            OfferState::Published => ListingOutcome::Published(offer),
            _ => ListingOutcome::PublishFailed(offer),
        })
    }

    async fn find_orphan(&self, offer: &Offer, sink: &dyn MarketplaceSink) -> Result<Option<String>> {
        let remote: Vec<RemoteOffer> =
            with_timeout(self.config.adapter_timeout, sink.list_offers()).await?;

        for candidate in remote.iter().filter(|r| offer.matches_remote(r)) {
            let owners = self
                .store
                .offers_by_sink_id(offer.user_id, &candidate.sink_offer_id)
                .await?;
            if owners.is_empty() {
                return Ok(Some(candidate.sink_offer_id.clone()));
            }
        }
        Ok(None)
    }

    async fn mark_published(&self, offer: &Offer, sink_offer_id: String) -> Result<Offer> {
        let owners = self
            .store
            .offers_by_sink_id(offer.user_id, &sink_offer_id)
            .await?;
        if owners.iter().any(|o| o.offer_id != offer.offer_id) {
            let reason = format!("sink offer {sink_offer_id} is already owned by another offer");
            self.attention(offer.user_id, Some(offer.offer_id), None, &reason);
            return Err(EngineError::data_integrity(reason));
        }

        self.write_offer(offer, OfferState::Published, move |o| {
            o.sink_offer_id = Some(sink_offer_id.clone());
            o.failure_reason = None;
        })
        .await
    }

    // =========================================================================
    // Sales and fulfilment
    // =========================================================================

    /// Records a sink order against its published offer.
    ///
    /// A sale against an offer that is no longer published (expired,
    /// rejected, already sold) cannot be fulfilled: it is stored as a
    /// `Cancelled` order, cancelled on the sink and flagged for attention.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DataIntegrity`] if several offers claim the
    /// sink offer id, or a store error.
    pub async fn record_sale(
        &self,
        user_id: UserId,
        sale: &SinkOrder,
        sink: &dyn MarketplaceSink,
    ) -> Result<SaleOutcome> {
        let owners = self
            .store
            .offers_by_sink_id(user_id, &sale.sink_offer_id)
            .await?;
        let mut current = match owners.as_slice() {
            [] => {
                if let Some(existing) = self.store.order_by_sink_id(&sale.sink_order_id).await? {
                    return Ok(SaleOutcome::Duplicate(existing));
                }
                warn!(
                    user_id = %user_id,
                    sink_order_id = %sale.sink_order_id,
                    sink_offer_id = %sale.sink_offer_id,
                    "order for unknown offer ignored"
                );
                return Ok(SaleOutcome::Unmatched);
            }
            [offer] => offer.clone(),
            _ => {
                let reason = format!(
                    "{} offers claim sink offer {}",
                    owners.len(),
                    sale.sink_offer_id
                );
                self.attention(user_id, None, None, &reason);
                return Err(EngineError::data_integrity(reason));
            }
        };

        for _ in 0..MAX_CONFLICT_RETRIES {
            if let Some(existing) = self.store.order_by_sink_id(&sale.sink_order_id).await? {
                return Ok(SaleOutcome::Duplicate(existing));
            }
            let now = Utc::now();
            let mut order = Order::new(&current, sale, now);
            let mut sold = current.clone();
            let refused = current.state != OfferState::Published;
            if refused {
                order.state = OrderState::Cancelled;
                order.failure_reason = Some(format!("sold while offer was {}", current.state));
            } else {
                sold.state = OfferState::Sold;
            }
            sold.updated_at = now;

            match self.store.record_sale(&order, &sold, current.version).await {
                Ok(Inserted::Created(order)) if refused => {
                    return Ok(self.refuse_sale(&current, order, sink).await);
                }
                Ok(Inserted::Created(order)) => {
                    info!(
                        user_id = %user_id,
                        offer_id = %current.offer_id,
                        order_id = %order.order_id,
                        sink_order_id = %order.sink_order_id,
                        amount = %order.amount,
                        "sale recorded"
                    );
                    self.emit_offer_transition(&current, OfferState::Sold);
                    self.emit(EngineEvent::SaleRecorded {
                        user_id,
                        order_id: order.order_id,
                        sink_order_id: order.sink_order_id.clone(),
                        amount: order.amount,
                    });
                    return Ok(SaleOutcome::Recorded(order));
                }
                Ok(Inserted::Existing(order)) => return Ok(SaleOutcome::Duplicate(order)),
                Err(StoreError::Conflict { .. }) => {
                    current = self.reload_offer(current.offer_id).await?;
                }
                Err(StoreError::Integrity(reason)) => {
                    self.attention(user_id, Some(current.offer_id), None, &reason);
                    return Err(EngineError::DataIntegrity(reason));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Conflict {
            entity: "offer",
            id: current.offer_id,
        })
    }

    /// Cancels a sale the engine cannot fulfil and asks for attention.
    async fn refuse_sale(&self, offer: &Offer, order: Order, sink: &dyn MarketplaceSink) -> SaleOutcome {
        let cancelled =
            with_timeout(self.config.adapter_timeout, sink.cancel_order(&order.sink_order_id)).await;
        let reason = match &cancelled {
            Ok(()) => format!(
                "sink order {} arrived for {} offer; cancelled",
                order.sink_order_id, offer.state
            ),
            Err(err) => format!(
                "sink order {} arrived for {} offer; cancel failed: {err}",
                order.sink_order_id, offer.state
            ),
        };
        self.attention(order.user_id, Some(offer.offer_id), Some(order.order_id), &reason);
        self.emit_order_finished(&order);
        SaleOutcome::Refused(order)
    }

    /// Buys the source item for a new order and delivers it.
    ///
    /// Returns the order in its final state for this pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is not `New`, its offer is not `Sold`,
    /// or the store fails.
    pub async fn fulfill(
        &self,
        order: &Order,
        source: &dyn ListingSource,
        sink: &dyn MarketplaceSink,
    ) -> Result<Order> {
        if order.state != OrderState::New {
            return Err(EngineError::invalid_transition(
                "order",
                order.order_id,
                order.state,
                OrderState::Fulfilling,
            ));
        }
        let offer = self.reload_offer(order.offer_id).await?;
        if offer.state != OfferState::Sold {
            return Err(EngineError::invalid_transition(
                "offer",
                offer.offer_id,
                offer.state,
                OfferState::Fulfilling,
            ));
        }
        let destination_price = offer.destination_price().ok_or_else(|| {
            EngineError::data_integrity(format!("sold offer {} has no price", offer.offer_id))
        })?;

        let (order, offer) = self
            .write_pair(order, OrderState::Fulfilling, &offer, OfferState::Fulfilling, |_| {}, |_| {})
            .await?;

        let expected_price = recover_source_price(destination_price, offer.markup_percent);
        let source_id = offer.source_id.as_str();
        info!(
            order_id = %order.order_id,
            source_id = %source_id,
            expected_price = %expected_price,
            "purchasing source item"
        );

        let purchase = retry(
            &self.config.retry,
            self.config.adapter_timeout,
            "purchase_item",
            move || source.purchase_item(source_id, expected_price),
        )
        .await;

        match purchase {
            Ok((receipt, _)) => {
                let mut next = order.clone();
                next.purchase_ref = Some(receipt.purchase_ref.clone());
                next.updated_at = Utc::now();
                let order = self
                    .store
                    .store_purchase(&next, order.version, &receipt.payload)
                    .await?;
                info!(
                    order_id = %order.order_id,
                    purchase_ref = %receipt.purchase_ref,
                    "source item purchased"
                );
                self.deliver(&order, &offer, &receipt.payload, sink).await
            }
            Err(failure) => self.handle_purchase_failure(&order, &offer, failure, sink).await,
        }
    }

    async fn handle_purchase_failure(
        &self,
        order: &Order,
        offer: &Offer,
        failure: RetryFailure,
        sink: &dyn MarketplaceSink,
    ) -> Result<Order> {
        let error = failure.error().clone();
        // A business refusal only proves nothing was bought if no earlier
        // attempt could have gone through unseen.
        let definite = matches!(failure, RetryFailure::Terminal { attempts: 1, .. })
            && (error.is_business_failure() || matches!(error, AdapterError::Authentication(_)));

        if definite {
            let reason = format!("purchase failed: {error}");
            let order_reason = reason.clone();
            let (order, _) = self
                .write_pair(
                    order,
                    OrderState::Cancelled,
                    offer,
                    OfferState::Failed,
                    move |o| o.failure_reason = Some(order_reason.clone()),
                    move |o| o.failure_reason = Some(reason.clone()),
                )
                .await?;

            match with_timeout(self.config.adapter_timeout, sink.cancel_order(&order.sink_order_id)).await {
                Ok(()) => info!(
                    order_id = %order.order_id,
                    sink_order_id = %order.sink_order_id,
                    "sink order cancelled"
                ),
                Err(err) => warn!(
                    order_id = %order.order_id,
                    sink_order_id = %order.sink_order_id,
                    error = %err,
                    "best-effort cancel failed"
                ),
            }
            self.emit_order_finished(&order);
            return Ok(order);
        }

        let reason = format!(
            "purchase outcome unknown after {} attempts: {error}",
            failure.attempts()
        );
        let order_reason = reason.clone();
        let offer_reason = reason.clone();
        let (order, offer) = self
            .write_pair(
                order,
                OrderState::Failed,
                offer,
                OfferState::Failed,
                move |o| o.failure_reason = Some(order_reason.clone()),
                move |o| o.failure_reason = Some(offer_reason.clone()),
            )
            .await?;
        self.attention(order.user_id, Some(offer.offer_id), Some(order.order_id), &reason);
        self.emit_order_finished(&order);
        Ok(order)
    }

    /// Delivers a purchased payload, finishing both records.
    async fn deliver(
        &self,
        order: &Order,
        offer: &Offer,
        payload: &DeliveryPayload,
        sink: &dyn MarketplaceSink,
    ) -> Result<Order> {
        let sink_order_id = order.sink_order_id.as_str();
        let delivery = retry(
            &self.config.retry,
            self.config.adapter_timeout,
            "deliver_order",
            move || sink.deliver_order(sink_order_id, payload),
        )
        .await;

        match delivery {
            Ok(((), attempts)) => {
                let (order, _) = self
                    .write_pair(
                        order,
                        OrderState::Delivered,
                        offer,
                        OfferState::Fulfilled,
                        move |o| {
                            o.delivery_attempts += attempts;
                            o.failure_reason = None;
                        },
                        |_| {},
                    )
                    .await?;
                info!(
                    user_id = %order.user_id,
                    order_id = %order.order_id,
                    attempts,
                    "order delivered"
                );
                self.emit_order_finished(&order);
                Ok(order)
            }
            Err(failure) => {
                let attempts = failure.attempts();
                let reason = format!("delivery failed, purchased item retained: {}", failure.error());
                let order_reason = reason.clone();
                let offer_reason = reason.clone();
                let (order, offer) = self
                    .write_pair(
                        order,
                        OrderState::Failed,
                        offer,
                        OfferState::Failed,
                        move |o| {
                            o.delivery_attempts += attempts;
                            o.failure_reason = Some(order_reason.clone());
                        },
                        move |o| o.failure_reason = Some(offer_reason.clone()),
                    )
                    .await?;
                self.attention(order.user_id, Some(offer.offer_id), Some(order.order_id), &reason);
                self.emit_order_finished(&order);
                Ok(order)
            }
        }
    }

    // =========================================================================
    // Recovery and housekeeping
    // =========================================================================

    /// Re-evaluates `Discovered` leftovers and publishes `Priced` offers
    /// while the tier limit allows.
    ///
    /// # Errors
    ///
    /// Returns an error only if the offers cannot be listed from the store.
    pub async fn resume_offers(
        &self,
        settings: &UserSettings,
        source: &dyn ListingSource,
        sink: &dyn MarketplaceSink,
        now: DateTime<Utc>,
    ) -> Result<ResumeReport> {
        let user_id = settings.user_id;
        let mut report = ResumeReport::default();

        for offer in self.store.offers_in_state(user_id, OfferState::Discovered).await? {
            let listing = match with_timeout(
                self.config.adapter_timeout,
                source.fetch_listing_detail(&offer.source_id),
            )
            .await
            {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(offer_id = %offer.offer_id, error = %err, "cannot refetch listing");
                    report.errors += 1;
                    continue;
                }
            };
            match self.evaluate(&offer, &listing, settings, now).await {
                Ok(_) => report.reevaluated += 1,
                Err(err) => {
                    warn!(offer_id = %offer.offer_id, error = %err, "re-evaluation failed");
                    report.errors += 1;
                }
            }
        }

        for offer in self.store.offers_in_state(user_id, OfferState::Priced).await? {
            if !self.has_capacity(settings).await? {
                debug!(user_id = %user_id, "tier limit reached, remaining offers stay priced");
                break;
            }
            match self.publish(&offer, sink).await {
                Ok(offer) if offer.state == OfferState::Published => report.published += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    warn!(offer_id = %offer.offer_id, error = %err, "resumed publish failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Fulfils `New` orders and settles `Fulfilling` orders left by an
    /// interrupted cycle. A purchase is never repeated: an order without a
    /// purchase reference is failed for the operator.
    ///
    /// # Errors
    ///
    /// Returns an error only if the orders cannot be listed from the store.
    pub async fn resume_orders(
        &self,
        user_id: UserId,
        source: &dyn ListingSource,
        sink: &dyn MarketplaceSink,
    ) -> Result<ResumeReport> {
        let mut report = ResumeReport::default();

        for order in self.store.orders_in_state(user_id, OrderState::New).await? {
            match self.fulfill(&order, source, sink).await {
                Ok(order) if order.state == OrderState::Delivered => report.fulfilled += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    warn!(order_id = %order.order_id, error = %err, "fulfilment failed");
                    report.errors += 1;
                }
            }
        }

        for order in self.store.orders_in_state(user_id, OrderState::Fulfilling).await? {
            match self.settle_interrupted(&order, sink).await {
                Ok(order) if order.state == OrderState::Delivered => report.redelivered += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    warn!(order_id = %order.order_id, error = %err, "cannot settle interrupted order");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Runs [`Self::resume_offers`] then [`Self::resume_orders`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn resume(
        &self,
        settings: &UserSettings,
        source: &dyn ListingSource,
        sink: &dyn MarketplaceSink,
        now: DateTime<Utc>,
    ) -> Result<ResumeReport> {
        let offers = self.resume_offers(settings, source, sink, now).await?;
        let orders = self.resume_orders(settings.user_id, source, sink).await?;
        Ok(ResumeReport {
            reevaluated: offers.reevaluated,
            published: offers.published,
            fulfilled: orders.fulfilled,
            redelivered: orders.redelivered,
            failed: offers.failed + orders.failed,
            errors: offers.errors + orders.errors,
        })
    }

    async fn settle_interrupted(&self, order: &Order, sink: &dyn MarketplaceSink) -> Result<Order> {
        let offer = self.reload_offer(order.offer_id).await?;
        let payload = match order.purchase_ref {
            Some(_) => self.store.delivery_payload(order.order_id).await?,
            None => None,
        };

        match payload {
            Some(payload) => {
                info!(order_id = %order.order_id, "redelivering purchased item");
                self.deliver(order, &offer, &payload, sink).await
            }
            None => {
                let reason = if order.purchase_ref.is_some() {
                    "purchased item payload missing".to_string()
                } else {
                    "purchase interrupted, outcome unknown".to_string()
                };
                let order_reason = reason.clone();
                let offer_reason = reason.clone();
                let (order, offer) = self
                    .write_pair(
                        order,
                        OrderState::Failed,
                        &offer,
                        OfferState::Failed,
                        move |o| o.failure_reason = Some(order_reason.clone()),
                        move |o| o.failure_reason = Some(offer_reason.clone()),
                    )
                    .await?;
                self.attention(order.user_id, Some(offer.offer_id), Some(order.order_id), &reason);
                self.emit_order_finished(&order);
                Ok(order)
            }
        }
    }

    /// Withdraws published offers idle longer than the TTL and marks them
    /// `Expired`. An offer whose withdrawal fails stays `Published` and is
    /// retried on the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn expire_stale(
        &self,
        user_id: UserId,
        sink: &dyn MarketplaceSink,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff = now - self.config.offer_ttl;
        let mut expired = 0;

        for offer in self.store.offers_in_state(user_id, OfferState::Published).await? {
            if offer.updated_at > cutoff {
                continue;
            }
            if let Some(sink_offer_id) = &offer.sink_offer_id {
                if let Err(err) =
                    with_timeout(self.config.adapter_timeout, sink.withdraw_offer(sink_offer_id)).await
                {
                    warn!(
                        offer_id = %offer.offer_id,
                        sink_offer_id = %sink_offer_id,
                        error = %err,
                        "withdraw failed, offer stays published"
                    );
                    continue;
                }
            }
            match self
                .write_offer(&offer, OfferState::Expired, |o| {
                    o.failure_reason = Some("idle past offer ttl".to_string());
                })
                .await
            {
                Ok(_) => expired += 1,
                Err(EngineError::Conflict { .. }) => {
                    debug!(offer_id = %offer.offer_id, "offer changed while expiring");
                }
                Err(err) => warn!(offer_id = %offer.offer_id, error = %err, "cannot expire offer"),
            }
        }

        Ok(expired)
    }

    /// Checks every published offer on the sink and marks rejected ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn audit_published(
        &self,
        user_id: UserId,
        sink: &dyn MarketplaceSink,
    ) -> Result<AuditReport> {
        let mut report = AuditReport::default();

        for offer in self.store.offers_in_state(user_id, OfferState::Published).await? {
            let Some(sink_offer_id) = offer.sink_offer_id.clone() else {
                continue;
            };
            report.checked += 1;

            let status =
                match with_timeout(self.config.adapter_timeout, sink.offer_status(&sink_offer_id)).await {
                    Ok(status) => status,
                    Err(err) => {
                        debug!(offer_id = %offer.offer_id, error = %err, "offer status unavailable");
                        report.errors += 1;
                        continue;
                    }
                };

            match status {
                SinkOfferStatus::Active => {}
                SinkOfferStatus::Missing => {
                    warn!(
                        offer_id = %offer.offer_id,
                        sink_offer_id = %sink_offer_id,
                        "published offer missing on sink"
                    );
                    report.missing += 1;
                }
                SinkOfferStatus::Rejected { reason } => {
                    let reason = format!("rejected by sink: {reason}");
                    match self
                        .write_offer(&offer, OfferState::Rejected, move |o| {
                            o.failure_reason = Some(reason.clone());
                        })
                        .await
                    {
                        Ok(_) => report.rejected += 1,
                        Err(err) => {
                            warn!(offer_id = %offer.offer_id, error = %err, "cannot mark offer rejected");
                            report.errors += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Offer counters for the front-end.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn offer_stats(&self, settings: &UserSettings) -> Result<OfferStats> {
        let counts = self.store.count_offers(settings.user_id).await?;
        Ok(stats::offer_stats(&counts, settings.offer_limit()))
    }

    /// Order counters for the front-end.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn order_stats(&self, user_id: UserId) -> Result<OrderStats> {
        let counts = self.store.count_orders(user_id).await?;
        Ok(stats::order_stats(&counts))
    }

    // =========================================================================
    // Versioned writes
    // =========================================================================

    async fn reload_offer(&self, offer_id: Uuid) -> Result<Offer> {
        self.store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::data_integrity(format!("offer {offer_id} not found")))
    }

    async fn reload_order(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::data_integrity(format!("order {order_id} not found")))
    }

    /// Writes `offer` moved to `to` (or rewritten in place when `to` equals
    /// its current state), re-reading on version conflicts.
    async fn write_offer<F>(&self, offer: &Offer, to: OfferState, mutate: F) -> Result<Offer>
    where
        F: Fn(&mut Offer) + Send + Sync,
    {
        let from = offer.state;
        if from != to && !from.can_transition_to(to) {
            return Err(EngineError::invalid_transition("offer", offer.offer_id, from, to));
        }

        let mut current = offer.clone();
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut next = current.clone();
            mutate(&mut next);
            next.state = to;
            next.updated_at = Utc::now();

            match self.store.update_offer(&next, current.version).await {
                Ok(saved) => {
                    if from != to {
                        info!(
                            user_id = %saved.user_id,
                            offer_id = %saved.offer_id,
                            from = %from,
                            to = %to,
                            "offer transition"
                        );
                        self.emit_offer_transition(&current, to);
                    }
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) => {
                    current = self.reload_offer(offer.offer_id).await?;
                    if current.state != from {
                        return Err(EngineError::Conflict {
                            entity: "offer",
                            id: offer.offer_id,
                        });
                    }
                    debug!(offer_id = %offer.offer_id, "version conflict, retrying write");
                }
                Err(StoreError::Integrity(reason)) => {
                    self.attention(offer.user_id, Some(offer.offer_id), None, &reason);
                    return Err(EngineError::DataIntegrity(reason));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Conflict {
            entity: "offer",
            id: offer.offer_id,
        })
    }

    /// Moves an order and its offer together in one store write.
    async fn write_pair<FO, FF>(
        &self,
        order: &Order,
        order_to: OrderState,
        offer: &Offer,
        offer_to: OfferState,
        mutate_order: FO,
        mutate_offer: FF,
    ) -> Result<(Order, Offer)>
    where
        FO: Fn(&mut Order) + Send + Sync,
        FF: Fn(&mut Offer) + Send + Sync,
    {
        let (order_from, offer_from) = (order.state, offer.state);
        if order_from != order_to && !order_from.can_transition_to(order_to) {
            return Err(EngineError::invalid_transition("order", order.order_id, order_from, order_to));
        }
        if offer_from != offer_to && !offer_from.can_transition_to(offer_to) {
            return Err(EngineError::invalid_transition("offer", offer.offer_id, offer_from, offer_to));
        }

        let mut current_order = order.clone();
        let mut current_offer = offer.clone();
        for _ in 0..MAX_CONFLICT_RETRIES {
            let now = Utc::now();
            let mut next_order = current_order.clone();
            mutate_order(&mut next_order);
            next_order.state = order_to;
            next_order.updated_at = now;
            let mut next_offer = current_offer.clone();
            mutate_offer(&mut next_offer);
            next_offer.state = offer_to;
            next_offer.updated_at = now;

            match self
                .store
                .update_order_and_offer(
                    &next_order,
                    current_order.version,
                    &next_offer,
                    current_offer.version,
                )
                .await
            {
                Ok((saved_order, saved_offer)) => {
                    if order_from != order_to {
                        info!(
                            user_id = %saved_order.user_id,
                            order_id = %saved_order.order_id,
                            from = %order_from,
                            to = %order_to,
                            "order transition"
                        );
                    }
                    if offer_from != offer_to {
                        info!(
                            user_id = %saved_offer.user_id,
                            offer_id = %saved_offer.offer_id,
                            from = %offer_from,
                            to = %offer_to,
                            "offer transition"
                        );
                        self.emit_offer_transition(&current_offer, offer_to);
                    }
                    return Ok((saved_order, saved_offer));
                }
                Err(StoreError::Conflict { .. }) => {
                    current_order = self.reload_order(order.order_id).await?;
                    current_offer = self.reload_offer(offer.offer_id).await?;
                    if current_order.state != order_from || current_offer.state != offer_from {
                        return Err(EngineError::Conflict {
                            entity: "order",
                            id: order.order_id,
                        });
                    }
                }
                Err(StoreError::Integrity(reason)) => {
                    self.attention(order.user_id, Some(offer.offer_id), Some(order.order_id), &reason);
                    return Err(EngineError::DataIntegrity(reason));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::Conflict {
            entity: "order",
            id: order.order_id,
        })
    }

    // =========================================================================
    // Events
    // =========================================================================

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_offer_transition(&self, before: &Offer, to: OfferState) {
        self.emit(EngineEvent::OfferTransition {
            user_id: before.user_id,
            offer_id: before.offer_id,
            from: before.state,
            to,
            timestamp: Utc::now(),
        });
    }

    fn emit_order_finished(&self, order: &Order) {
        self.emit(EngineEvent::OrderFinished {
            user_id: order.user_id,
            order_id: order.order_id,
            state: order.state,
        });
    }

    fn attention(&self, user_id: UserId, offer_id: Option<Uuid>, order_id: Option<Uuid>, reason: &str) {
        error!(
            user_id = %user_id,
            offer_id = ?offer_id,
            order_id = ?order_id,
            reason,
            "operator attention required"
        );
        self.emit(EngineEvent::AttentionRequired {
            user_id,
            offer_id,
            order_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("filter_errors", &self.filter.filter_errors())
            .finish_non_exhaustive()
    }
}
