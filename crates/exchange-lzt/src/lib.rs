//! LZT market adapter.
//!
//! Discovers account listings by category and price range and buys them
//! through fast-buy. Implements [`relist_core::ListingSource`].

pub mod client;
pub mod error;
mod types;

pub use client::{LztClient, LztClientConfig, LZT_API_URL, PRICE_TOLERANCE};
