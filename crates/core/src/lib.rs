//! Shared vocabulary of the relisting workspace: listings, offers, orders,
//! user settings, credentials, adapter traits, errors and configuration.

pub mod config;
pub mod config_loader;
pub mod credentials;
pub mod error;
pub mod events;
pub mod offer;
pub mod settings;
pub mod traits;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, EngineConfig, G2gConfig, LztConfig, SchedulerConfig};
pub use config_loader::ConfigLoader;
pub use credentials::{DeliveryPayload, G2gCredentials, LztCredentials, PurchaseReceipt};
pub use error::{AdapterError, FailureClass, SettingsError};
pub use events::EngineEvent;
pub use offer::{
    Offer, OfferContent, OfferState, Order, OrderState, RemoteOffer, SinkOfferStatus, SinkOrder,
    UnknownState,
};
pub use settings::{ActivityFilter, AgeFilter, Tier, UserSettings};
pub use traits::{ListingSource, MarketplaceSink};
pub use types::{Category, Listing, UnknownCategory, UserId};
