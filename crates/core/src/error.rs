//! Error taxonomy shared by the marketplace adapters and the engine.
//!
//! Adapters never retry on their own. They map every failure onto an
//! [`AdapterError`], and the engine decides what to do via
//! [`AdapterError::classify`].

use rust_decimal::Decimal;
use thiserror::Error;

// =============================================================================
// Adapter Errors
// =============================================================================

/// How the engine should treat a failed adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with the normal backoff.
    Retryable,
    /// Retry, but wait at least the server-provided delay.
    RetryableSlow {
        /// Minimum wait in seconds.
        retry_after_secs: u64,
    },
    /// Do not retry.
    Terminal,
}

/// Errors reported by a listing source or marketplace sink.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// Network failure or 5xx response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Call did not complete within the adapter timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Marketplace throttled the caller.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the server asked us to wait.
        retry_after_secs: u64,
    },

    /// Marketplace refused the request for a business reason.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The source item is no longer for sale.
    #[error("item out of stock")]
    OutOfStock,

    /// The source price moved since discovery.
    #[error("price changed: expected {expected}, actual {actual}")]
    PriceChanged {
        /// Price the engine expected to pay.
        expected: Decimal,
        /// Price the marketplace now asks.
        actual: Decimal,
    },

    /// Not enough balance on the source account.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Credentials were refused.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl AdapterError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates a price change error.
    pub fn price_changed(expected: Decimal, actual: Decimal) -> Self {
        Self::PriceChanged { expected, actual }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Maps the error to a retry decision.
    #[must_use]
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Transport(_) | Self::Timeout(_) => FailureClass::Retryable,
            Self::RateLimited { retry_after_secs } => FailureClass::RetryableSlow {
                retry_after_secs: *retry_after_secs,
            },
            Self::Rejected(_)
            | Self::OutOfStock
            | Self::PriceChanged { .. }
            | Self::InsufficientFunds
            | Self::Authentication(_)
            | Self::Decode(_) => FailureClass::Terminal,
        }
    }

    /// Returns true if the error is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self.classify(), FailureClass::Terminal)
    }

    /// Returns true for failures where the marketplace made a definite
    /// business decision (as opposed to an unknown outcome).
    #[must_use]
    pub fn is_business_failure(&self) -> bool {
        matches!(
            self,
            Self::Rejected(_) | Self::OutOfStock | Self::PriceChanged { .. } | Self::InsufficientFunds
        )
    }
}

// =============================================================================
// Settings Errors
// =============================================================================

/// Reasons a settings update is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Markup outside 1..=500.
    #[error("markup must be between 1 and 500 percent, got {0}")]
    MarkupOutOfRange(u32),

    /// Minimum price below 1.
    #[error("minimum price must be at least 1, got {0}")]
    PriceMinTooLow(Decimal),

    /// Maximum price not above minimum.
    #[error("maximum price {max} must be greater than minimum price {min}")]
    PriceRangeInverted {
        /// Requested minimum.
        min: Decimal,
        /// Requested maximum.
        max: Decimal,
    },

    /// Activity filter day count is zero.
    #[error("activity filter must be at least 1 day")]
    ActivityDaysZero,

    /// Unrecognized filter value.
    #[error("invalid filter value: {0}")]
    InvalidFilter(String),
}
