//! Per-user counters shown by the front-end.

use relist_core::{OfferState, OrderState};
use serde::Serialize;

use crate::store::StateCounts;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfferStats {
    pub total: u64,
    /// Offers holding a tier slot: published, sold or fulfilling.
    pub active: u64,
    /// Offers that found a buyer, fulfilled or not.
    pub sold: u64,
    pub limit: u32,
    pub publish_failed: u64,
    pub failed: u64,
}

impl OfferStats {
    /// Tier slots still free.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.active)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub new: u64,
    pub processing: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl OrderStats {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.new + self.processing + self.delivered + self.cancelled + self.failed
    }
}

fn count<S: std::hash::Hash + Eq>(counts: &StateCounts<S>, state: S) -> u64 {
    counts.get(&state).copied().unwrap_or(0)
}

#[must_use]
pub fn offer_stats(counts: &StateCounts<OfferState>, limit: u32) -> OfferStats {
    OfferStats {
        total: counts.values().sum(),
        active: counts
            .iter()
            .filter(|(state, _)| state.is_live())
            .map(|(_, n)| *n)
            .sum(),
        sold: count(counts, OfferState::Sold)
            + count(counts, OfferState::Fulfilling)
            + count(counts, OfferState::Fulfilled),
        limit,
        publish_failed: count(counts, OfferState::PublishFailed),
        failed: count(counts, OfferState::Failed),
    }
}

#[must_use]
pub fn order_stats(counts: &StateCounts<OrderState>) -> OrderStats {
    OrderStats {
        new: count(counts, OrderState::New),
        processing: count(counts, OrderState::Fulfilling),
        delivered: count(counts, OrderState::Delivered),
        cancelled: count(counts, OrderState::Cancelled),
        failed: count(counts, OrderState::Failed),
    }
}
