use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::offer::{OfferState, OrderState};
use crate::types::UserId;

/// Notification side-channel emitted by the engine and scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// An offer moved between lifecycle states.
    OfferTransition {
        user_id: UserId,
        offer_id: Uuid,
        from: OfferState,
        to: OfferState,
        timestamp: DateTime<Utc>,
    },

    /// A new sale was recorded.
    SaleRecorded {
        user_id: UserId,
        order_id: Uuid,
        sink_order_id: String,
        amount: Decimal,
    },

    /// An order reached a terminal state.
    OrderFinished {
        user_id: UserId,
        order_id: Uuid,
        state: OrderState,
    },

    /// An operator has to look at something (unknown purchase outcome,
    /// undeliverable item, integrity violation).
    AttentionRequired {
        user_id: UserId,
        offer_id: Option<Uuid>,
        order_id: Option<Uuid>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A scheduler cycle finished.
    CycleCompleted {
        user_id: UserId,
        kind: String,
        duration_ms: u64,
    },
}

impl EngineEvent {
    /// Returns the user the event belongs to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        match self {
            Self::OfferTransition { user_id, .. }
            | Self::SaleRecorded { user_id, .. }
            | Self::OrderFinished { user_id, .. }
            | Self::AttentionRequired { user_id, .. }
            | Self::CycleCompleted { user_id, .. } => *user_id,
        }
    }
}
