//! Offer-lifecycle engine: filtering, pricing, publication, sale recording,
//! fulfilment and recovery over a versioned [`OfferStore`].
//!
//! # Example
//!
//! ```ignore
//! use relist_engine::{MemoryStore, Reconciler};
//!
//! let reconciler = Reconciler::new(Arc::new(MemoryStore::new()));
//! for listing in source.fetch_listings(category, min, max).await? {
//!     reconciler.process_listing(&listing, &settings, &sink, Utc::now()).await?;
//! }
//! ```

pub mod error;
pub mod filter;
pub mod pricing;
pub mod reconciler;
pub mod retry;
pub mod stats;
pub mod store;
pub mod templates;

pub use error::{EngineError, Result};
pub use filter::{evaluate, FilterDecision, FilterEngine, FilterRejection, TimestampField};
pub use pricing::{destination_price, recover_source_price, PricingEngine};
pub use reconciler::{
    AuditReport, Discovery, ListingOutcome, Reconciler, ReconcilerConfig, ResumeReport,
    SaleOutcome,
};
pub use retry::{retry, with_timeout, RetryFailure, RetryPolicy};
pub use stats::{OfferStats, OrderStats};
pub use store::{Inserted, MemoryStore, OfferStore, StateCounts, StoreError};
pub use templates::{FormattedOffer, FormatterRegistry, OfferFormatter};
