//! End-to-end lifecycle scenarios against scripted marketplaces.
//!
//! Covers discovery dedupe, publication retry and orphan adoption, sale
//! recording, fulfilment outcomes, crash recovery, expiry and audit.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use relist_core::{
    ActivityFilter, AdapterError, Category, DeliveryPayload, EngineEvent, Listing, ListingSource,
    MarketplaceSink, OfferContent, OfferState, OrderState, PurchaseReceipt, RemoteOffer,
    SinkOfferStatus, SinkOrder, UserId, UserSettings,
};
use relist_engine::{
    Discovery, ListingOutcome, MemoryStore, OfferStore, Reconciler, ReconcilerConfig, RetryPolicy,
    SaleOutcome,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Scripted Marketplaces
// =============================================================================

#[derive(Default)]
struct ScriptedSource {
    details: Mutex<HashMap<String, Listing>>,
    purchases: Mutex<VecDeque<Result<PurchaseReceipt, AdapterError>>>,
    purchase_prices: Mutex<Vec<Decimal>>,
    purchase_calls: AtomicU32,
}

impl ScriptedSource {
    fn with_purchases(results: Vec<Result<PurchaseReceipt, AdapterError>>) -> Self {
        Self {
            purchases: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    fn purchase_calls(&self) -> u32 {
        self.purchase_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for ScriptedSource {
    async fn fetch_listings(
        &self,
        _category: Category,
        _price_min: Decimal,
        _price_max: Decimal,
    ) -> Result<Vec<Listing>, AdapterError> {
        Ok(self.details.lock().values().cloned().collect())
    }

    async fn fetch_listing_detail(&self, source_id: &str) -> Result<Listing, AdapterError> {
        self.details
            .lock()
            .get(source_id)
            .cloned()
            .ok_or_else(|| AdapterError::rejected("item not found"))
    }

    async fn purchase_item(
        &self,
        source_id: &str,
        expected_price: Decimal,
    ) -> Result<PurchaseReceipt, AdapterError> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        self.purchase_prices.lock().push(expected_price);
        self.purchases.lock().pop_front().unwrap_or_else(|| {
            Ok(PurchaseReceipt {
                purchase_ref: format!("lzt-{source_id}"),
                payload: DeliveryPayload::new("login:password"),
            })
        })
    }
}

enum PublishStep {
    Fail(AdapterError),
    /// The offer is created remotely but the response is lost.
    CreateThenFail(AdapterError),
}

#[derive(Default)]
struct ScriptedSink {
    publish_steps: Mutex<VecDeque<PublishStep>>,
    remote: Mutex<Vec<RemoteOffer>>,
    statuses: Mutex<HashMap<String, SinkOfferStatus>>,
    deliveries: Mutex<VecDeque<Result<(), AdapterError>>>,
    delivered: Mutex<Vec<(String, String)>>,
    withdrawals: Mutex<VecDeque<Result<(), AdapterError>>>,
    withdrawn: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    publish_calls: AtomicU32,
    list_calls: AtomicU32,
    next_id: AtomicU32,
}

impl ScriptedSink {
    fn with_publish_steps(steps: Vec<PublishStep>) -> Self {
        Self {
            publish_steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    fn with_deliveries(results: Vec<Result<(), AdapterError>>) -> Self {
        Self {
            deliveries: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    fn publish_calls(&self) -> u32 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    fn create_remote(&self, content: &OfferContent) -> String {
        let id = format!("g2g-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.remote.lock().push(RemoteOffer {
            sink_offer_id: id.clone(),
            title: content.title.clone(),
            price: content.destination_price,
            sink_category: content.sink_category.clone(),
        });
        id
    }
}

#[async_trait]
impl MarketplaceSink for ScriptedSink {
    async fn publish_offer(&self, content: &OfferContent) -> Result<String, AdapterError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.publish_steps.lock().pop_front();
        match step {
            None => Ok(self.create_remote(content)),
            Some(PublishStep::Fail(err)) => Err(err),
            Some(PublishStep::CreateThenFail(err)) => {
                self.create_remote(content);
                Err(err)
            }
        }
    }

    async fn list_offers(&self) -> Result<Vec<RemoteOffer>, AdapterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote.lock().clone())
    }

    async fn offer_status(&self, sink_offer_id: &str) -> Result<SinkOfferStatus, AdapterError> {
        Ok(self
            .statuses
            .lock()
            .get(sink_offer_id)
            .cloned()
            .unwrap_or(SinkOfferStatus::Active))
    }

    async fn withdraw_offer(&self, sink_offer_id: &str) -> Result<(), AdapterError> {
        let result = self.withdrawals.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.withdrawn.lock().push(sink_offer_id.to_string());
        }
        result
    }

    async fn fetch_orders(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SinkOrder>, AdapterError> {
        Ok(Vec::new())
    }

    async fn deliver_order(
        &self,
        sink_order_id: &str,
        payload: &DeliveryPayload,
    ) -> Result<(), AdapterError> {
        let result = self.deliveries.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.delivered
                .lock()
                .push((sink_order_id.to_string(), payload.expose().to_string()));
        }
        result
    }

    async fn cancel_order(&self, sink_order_id: &str) -> Result<(), AdapterError> {
        self.cancelled.lock().push(sink_order_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

const USER: UserId = UserId(42);

fn settings() -> UserSettings {
    UserSettings::new(USER)
        .with_markup(25)
        .unwrap()
        .with_price_range(dec!(1), dec!(100))
        .unwrap()
        .with_categories([Category::Steam])
        .with_activity_filter(ActivityFilter::Days(7))
        .unwrap()
}

fn listing(source_id: &str, price: Decimal) -> Listing {
    Listing::new(source_id, Category::Steam, price)
        .with_last_activity_at(Utc::now() - ChronoDuration::days(30))
        .with_attribute("steam_level", "15")
        .with_attribute("steam_game_count", "50")
}

fn reconciler(store: Arc<MemoryStore>) -> Reconciler {
    Reconciler::new(store).with_config(ReconcilerConfig {
        retry: RetryPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 5,
        },
        adapter_timeout: Duration::from_secs(10),
        offer_ttl: ChronoDuration::days(7),
        event_capacity: 64,
    })
}

fn sale(sink_order_id: &str, sink_offer_id: &str) -> SinkOrder {
    SinkOrder {
        sink_order_id: sink_order_id.to_string(),
        sink_offer_id: sink_offer_id.to_string(),
        amount: dec!(25.00),
        created_at: Some(Utc::now()),
    }
}

/// Publishes one listing and records a sale for it.
async fn sold_offer(
    reconciler: &Reconciler,
    sink: &ScriptedSink,
) -> (relist_core::Offer, relist_core::Order) {
    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), sink, Utc::now())
        .await
        .unwrap();
    let sink_offer_id = outcome.offer().sink_offer_id.clone().unwrap();
    let SaleOutcome::Recorded(order) = reconciler
        .record_sale(USER, &sale("ORD-1", &sink_offer_id), sink)
        .await
        .unwrap()
    else {
        panic!("sale not recorded");
    };
    let offer = reconciler.store().get_offer(order.offer_id).await.unwrap().unwrap();
    (offer, order)
}

// =============================================================================
// Discovery and Publication
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_eligible_listing_is_published_with_markup() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    let ListingOutcome::Published(offer) = outcome else {
        panic!("expected published, got {outcome:?}");
    };
    assert_eq!(offer.state, OfferState::Published);
    assert_eq!(offer.sink_offer_id.as_deref(), Some("g2g-1"));
    assert_eq!(offer.destination_price(), Some(dec!(25.00)));
    assert_eq!(offer.publish_attempts, 1);
    assert_eq!(sink.publish_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_listing_twice_publishes_once() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();
    let item = listing("X1", dec!(20.00));

    reconciler
        .process_listing(&item, &settings(), &sink, Utc::now())
        .await
        .unwrap();
    let second = reconciler
        .process_listing(&item, &settings(), &sink, Utc::now())
        .await
        .unwrap();

    assert!(matches!(second, ListingOutcome::Duplicate(_)));
    assert_eq!(sink.publish_calls(), 1);
    assert_eq!(store.all_offers().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_discovery_creates_one_offer() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Arc::new(reconciler(store.clone()));
    let item = listing("X1", dec!(20.00));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = Arc::clone(&reconciler);
        let item = item.clone();
        handles.push(tokio::spawn(async move {
            reconciler.discover(&item, &settings()).await.unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Discovery::Created(_)) {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.all_offers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_listing_is_filtered() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store);
    let sink = ScriptedSink::default();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(500.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    let ListingOutcome::Filtered(offer) = outcome else {
        panic!("expected filtered");
    };
    assert!(offer.failure_reason.unwrap().contains("price"));
    assert_eq!(sink.publish_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tier_limit_defers_extra_offers() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store);
    let sink = ScriptedSink::default();
    let settings = settings();

    let mut deferred = 0;
    for i in 0..21 {
        let outcome = reconciler
            .process_listing(&listing(&format!("X{i}"), dec!(20.00)), &settings, &sink, Utc::now())
            .await
            .unwrap();
        if let ListingOutcome::Deferred(offer) = outcome {
            assert_eq!(offer.state, OfferState::Priced);
            deferred += 1;
        }
    }

    assert_eq!(deferred, 1);
    assert_eq!(sink.publish_calls(), 20);
    assert!(!reconciler.has_capacity(&settings).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_publish_gives_up_after_five_attempts() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store);
    let sink = ScriptedSink::with_publish_steps(
        (0..10)
            .map(|_| PublishStep::Fail(AdapterError::transport("connection reset")))
            .collect(),
    );

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    let ListingOutcome::PublishFailed(offer) = outcome else {
        panic!("expected publish failure");
    };
    assert_eq!(offer.publish_attempts, 5);
    assert_eq!(sink.publish_calls(), 5);
    assert!(offer.sink_offer_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lost_publish_response_adopts_orphan() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store);
    let sink = ScriptedSink::with_publish_steps(vec![PublishStep::CreateThenFail(
        AdapterError::Timeout(10),
    )]);

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    let ListingOutcome::Published(offer) = outcome else {
        panic!("expected adoption");
    };
    assert_eq!(offer.sink_offer_id.as_deref(), Some("g2g-1"));
    assert_eq!(sink.publish_calls(), 1);
    assert_eq!(sink.remote.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_rejection_fails_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store);
    let sink = ScriptedSink::with_publish_steps(vec![PublishStep::Fail(AdapterError::rejected(
        "title not allowed",
    ))]);

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    assert!(matches!(outcome, ListingOutcome::PublishFailed(_)));
    assert_eq!(sink.publish_calls(), 1);
}

// =============================================================================
// Sales
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sale_is_recorded_once() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let (offer, order) = sold_offer(&reconciler, &sink).await;
    assert_eq!(offer.state, OfferState::Sold);
    assert_eq!(order.state, OrderState::New);

    let again = reconciler
        .record_sale(USER, &sale("ORD-1", offer.sink_offer_id.as_deref().unwrap()), &sink)
        .await
        .unwrap();
    assert_eq!(again, SaleOutcome::Duplicate(order));
    assert_eq!(store.all_orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sale_for_unknown_offer_is_ignored() {
    let reconciler = reconciler(Arc::new(MemoryStore::new()));
    let sink = ScriptedSink::default();
    let outcome = reconciler
        .record_sale(USER, &sale("ORD-9", "g2g-unknown"), &sink)
        .await
        .unwrap();
    assert_eq!(outcome, SaleOutcome::Unmatched);
    assert!(sink.cancelled.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sale_for_expired_offer_is_cancelled_and_flagged() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();
    let mut events = reconciler.subscribe();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();
    let sink_offer_id = outcome.offer().sink_offer_id.clone().unwrap();
    let later = Utc::now() + ChronoDuration::days(8);
    assert_eq!(reconciler.expire_stale(USER, &sink, later).await.unwrap(), 1);

    let SaleOutcome::Refused(order) = reconciler
        .record_sale(USER, &sale("ORD-9", &sink_offer_id), &sink)
        .await
        .unwrap()
    else {
        panic!("sale for expired offer was not refused");
    };
    assert_eq!(order.state, OrderState::Cancelled);
    assert_eq!(sink.cancelled.lock().as_slice(), &["ORD-9".to_string()]);

    let mut attention = false;
    while let Ok(event) = events.try_recv() {
        attention |= matches!(event, EngineEvent::AttentionRequired { order_id: Some(id), .. } if id == order.order_id);
    }
    assert!(attention);

    // The overlapping next sync sees the same order again.
    let again = reconciler
        .record_sale(USER, &sale("ORD-9", &sink_offer_id), &sink)
        .await
        .unwrap();
    assert_eq!(again, SaleOutcome::Duplicate(order));
    assert_eq!(sink.cancelled.lock().len(), 1);
    let offer = store.get_offer(outcome.offer().offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Expired);
}

#[tokio::test(start_paused = true)]
async fn test_second_sale_for_sold_offer_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let (offer, first) = sold_offer(&reconciler, &sink).await;
    let outcome = reconciler
        .record_sale(USER, &sale("ORD-2", offer.sink_offer_id.as_deref().unwrap()), &sink)
        .await
        .unwrap();

    assert!(matches!(outcome, SaleOutcome::Refused(_)));
    assert_eq!(sink.cancelled.lock().as_slice(), &["ORD-2".to_string()]);
    let kept = store.get_order(first.order_id).await.unwrap().unwrap();
    assert_eq!(kept.state, OrderState::New);
}

// =============================================================================
// Fulfilment
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fulfill_buys_and_delivers() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();
    let mut events = reconciler.subscribe();

    let (_, order) = sold_offer(&reconciler, &sink).await;
    let order = reconciler.fulfill(&order, &source, &sink).await.unwrap();

    assert_eq!(order.state, OrderState::Delivered);
    assert_eq!(order.purchase_ref.as_deref(), Some("lzt-X1"));
    assert_eq!(source.purchase_prices.lock().as_slice(), &[dec!(20.00)]);
    assert_eq!(
        sink.delivered.lock().as_slice(),
        &[("ORD-1".to_string(), "login:password".to_string())]
    );
    let offer = store.get_offer(order.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Fulfilled);

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::OrderFinished { state, .. } = event {
            finished = state == OrderState::Delivered;
        }
    }
    assert!(finished);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_stock_cancels_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::with_purchases(vec![Err(AdapterError::OutOfStock)]);
    let sink = ScriptedSink::default();

    let (_, order) = sold_offer(&reconciler, &sink).await;
    let order = reconciler.fulfill(&order, &source, &sink).await.unwrap();

    assert_eq!(order.state, OrderState::Cancelled);
    assert_eq!(source.purchase_calls(), 1);
    assert_eq!(sink.cancelled.lock().as_slice(), &["ORD-1".to_string()]);
    let offer = store.get_offer(order.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_purchase_outcome_needs_attention() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::with_purchases(
        (0..5).map(|_| Err(AdapterError::transport("reset"))).collect(),
    );
    let sink = ScriptedSink::default();
    let mut events = reconciler.subscribe();

    let (_, order) = sold_offer(&reconciler, &sink).await;
    let order = reconciler.fulfill(&order, &source, &sink).await.unwrap();

    assert_eq!(order.state, OrderState::Failed);
    assert_eq!(source.purchase_calls(), 5);
    assert!(sink.cancelled.lock().is_empty());

    let mut attention = false;
    while let Ok(event) = events.try_recv() {
        attention |= matches!(event, EngineEvent::AttentionRequired { order_id: Some(id), .. } if id == order.order_id);
    }
    assert!(attention);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_stock_after_lost_purchase_response_is_not_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::with_purchases(vec![
        Err(AdapterError::Timeout(10)),
        Err(AdapterError::OutOfStock),
    ]);
    let sink = ScriptedSink::default();
    let mut events = reconciler.subscribe();

    let (_, order) = sold_offer(&reconciler, &sink).await;
    let order = reconciler.fulfill(&order, &source, &sink).await.unwrap();

    // The first attempt may have bought the item.
    assert_eq!(source.purchase_calls(), 2);
    assert_eq!(order.state, OrderState::Failed);
    assert!(sink.cancelled.lock().is_empty());
    let offer = store.get_offer(order.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Failed);

    let mut attention = false;
    while let Ok(event) = events.try_recv() {
        attention |= matches!(event, EngineEvent::AttentionRequired { order_id: Some(id), .. } if id == order.order_id);
    }
    assert!(attention);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_keeps_purchased_item() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::with_deliveries(vec![Err(AdapterError::rejected("order closed"))]);

    let (_, order) = sold_offer(&reconciler, &sink).await;
    let order = reconciler.fulfill(&order, &source, &sink).await.unwrap();

    assert_eq!(order.state, OrderState::Failed);
    assert_eq!(order.delivery_attempts, 1);
    let payload = store.delivery_payload(order.order_id).await.unwrap().unwrap();
    assert_eq!(payload.expose(), "login:password");
}

// =============================================================================
// Recovery and Housekeeping
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_resume_publishes_priced_offers() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();
    let item = listing("X1", dec!(20.00));

    let Discovery::Created(offer) = reconciler.discover(&item, &settings()).await.unwrap() else {
        panic!("expected new offer");
    };
    let priced = reconciler
        .evaluate(&offer, &item, &settings(), Utc::now())
        .await
        .unwrap();
    assert_eq!(priced.state, OfferState::Priced);

    let report = reconciler
        .resume_offers(&settings(), &source, &sink, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.published, 1);
    let offer = store.get_offer(offer.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Published);
}

#[tokio::test(start_paused = true)]
async fn test_resume_reevaluates_discovered_offers() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();
    let item = listing("X1", dec!(20.00));
    source.details.lock().insert("X1".to_string(), item.clone());

    reconciler.discover(&item, &settings()).await.unwrap();
    let report = reconciler
        .resume_offers(&settings(), &source, &sink, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.reevaluated, 1);
    assert_eq!(report.published, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_redelivers_purchased_order() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();

    let (offer, order) = sold_offer(&reconciler, &sink).await;

    // Simulate a crash between purchase and delivery.
    let mut fulfilling_order = order.clone();
    fulfilling_order.state = OrderState::Fulfilling;
    let mut fulfilling_offer = offer.clone();
    fulfilling_offer.state = OfferState::Fulfilling;
    let (order, _) = store
        .update_order_and_offer(&fulfilling_order, order.version, &fulfilling_offer, offer.version)
        .await
        .unwrap();
    let mut purchased = order.clone();
    purchased.purchase_ref = Some("lzt-X1".to_string());
    store
        .store_purchase(&purchased, order.version, &DeliveryPayload::new("login:password"))
        .await
        .unwrap();

    let report = reconciler.resume_orders(USER, &source, &sink).await.unwrap();

    assert_eq!(report.redelivered, 1);
    assert_eq!(source.purchase_calls(), 0);
    assert_eq!(sink.delivered.lock().len(), 1);
    let order = store.get_order(order.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Delivered);
}

#[tokio::test(start_paused = true)]
async fn test_resume_never_repeats_interrupted_purchase() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();

    let (offer, order) = sold_offer(&reconciler, &sink).await;
    let mut fulfilling_order = order.clone();
    fulfilling_order.state = OrderState::Fulfilling;
    let mut fulfilling_offer = offer.clone();
    fulfilling_offer.state = OfferState::Fulfilling;
    store
        .update_order_and_offer(&fulfilling_order, order.version, &fulfilling_offer, offer.version)
        .await
        .unwrap();

    let report = reconciler.resume_orders(USER, &source, &sink).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(source.purchase_calls(), 0);
    let order = store.get_order(order.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_resume_fulfils_new_orders() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let source = ScriptedSource::default();
    let sink = ScriptedSink::default();

    sold_offer(&reconciler, &sink).await;
    let report = reconciler.resume_orders(USER, &source, &sink).await.unwrap();

    assert_eq!(report.fulfilled, 1);
    assert_eq!(source.purchase_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_offers_expire() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();

    let none = reconciler.expire_stale(USER, &sink, Utc::now()).await.unwrap();
    assert_eq!(none, 0);

    let later = Utc::now() + ChronoDuration::days(8);
    let expired = reconciler.expire_stale(USER, &sink, later).await.unwrap();
    assert_eq!(expired, 1);
    assert_eq!(sink.withdrawn.lock().as_slice(), &["g2g-1".to_string()]);
    let offer = store.get_offer(outcome.offer().offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Expired);
}

#[tokio::test(start_paused = true)]
async fn test_offer_stays_published_when_withdraw_fails() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();
    let sink_offer_id = outcome.offer().sink_offer_id.clone().unwrap();
    sink.withdrawals
        .lock()
        .push_back(Err(AdapterError::transport("connection reset")));

    let later = Utc::now() + ChronoDuration::days(8);
    assert_eq!(reconciler.expire_stale(USER, &sink, later).await.unwrap(), 0);
    let offer = store.get_offer(outcome.offer().offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Published);

    // Still live on the sink, so a sale is fulfilled normally.
    let sold = reconciler
        .record_sale(USER, &sale("ORD-9", &sink_offer_id), &sink)
        .await
        .unwrap();
    assert!(matches!(sold, SaleOutcome::Recorded(_)));
    assert!(sink.cancelled.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_withdraw_is_retried_next_pass() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    let outcome = reconciler
        .process_listing(&listing("X1", dec!(20.00)), &settings(), &sink, Utc::now())
        .await
        .unwrap();
    sink.withdrawals
        .lock()
        .push_back(Err(AdapterError::transport("connection reset")));

    let later = Utc::now() + ChronoDuration::days(8);
    assert_eq!(reconciler.expire_stale(USER, &sink, later).await.unwrap(), 0);
    assert_eq!(reconciler.expire_stale(USER, &sink, later).await.unwrap(), 1);

    assert_eq!(sink.withdrawn.lock().as_slice(), &["g2g-1".to_string()]);
    let offer = store.get_offer(outcome.offer().offer_id).await.unwrap().unwrap();
    assert_eq!(offer.state, OfferState::Expired);
}

#[tokio::test(start_paused = true)]
async fn test_audit_marks_rejected_offers() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(store.clone());
    let sink = ScriptedSink::default();

    for id in ["X1", "X2", "X3"] {
        reconciler
            .process_listing(&listing(id, dec!(20.00)), &settings(), &sink, Utc::now())
            .await
            .unwrap();
    }
    sink.statuses.lock().insert(
        "g2g-1".to_string(),
        SinkOfferStatus::Rejected {
            reason: "duplicate listing".to_string(),
        },
    );
    sink.statuses
        .lock()
        .insert("g2g-2".to_string(), SinkOfferStatus::Missing);

    let report = reconciler.audit_published(USER, &sink).await.unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.missing, 1);
    let stats = reconciler.offer_stats(&settings()).await.unwrap();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.total, 3);
}
