//! Error types for the reconciliation engine.

use relist_core::AdapterError;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A marketplace call failed and was not recovered by retrying.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The requested operation contradicts business rules.
    #[error("business rule violated: {0}")]
    BusinessRule(String),

    /// Stored records contradict each other; the offer is halted.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Another writer changed the record and the expected state no longer holds.
    #[error("concurrent modification of {entity} {id}")]
    Conflict { entity: &'static str, id: Uuid },

    /// The state machine does not allow this transition.
    #[error("invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn business_rule(message: impl Into<String>) -> Self {
        Self::BusinessRule(message.into())
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: Uuid,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if the error needs an operator.
    #[must_use]
    pub fn requires_attention(&self) -> bool {
        matches!(self, Self::DataIntegrity(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { entity, id } => Self::Conflict { entity, id },
            StoreError::Integrity(message) => Self::DataIntegrity(message),
            StoreError::NotFound { entity, id } => Self::Store(format!("{entity} {id} not found")),
            StoreError::Backend(message) => Self::Store(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
