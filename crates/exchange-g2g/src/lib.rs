//! G2G marketplace adapter.
//!
//! Publishes offers, polls orders and delivers purchased accounts through
//! the signed G2G seller API. Implements [`relist_core::MarketplaceSink`].

pub mod auth;
pub mod client;
pub mod error;
mod types;

pub use auth::{G2gHeaders, G2gSigner};
pub use client::{G2gClient, G2gClientConfig, G2G_API_URL};
