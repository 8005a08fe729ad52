//! Per-user relisting settings.
//!
//! Settings are loaded once per cycle and passed explicitly to the filter and
//! pricing engines. Every mutation goes through a validating `with_*` method,
//! so a [`UserSettings`] value in hand always satisfies its invariants.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::SettingsError;
use crate::types::{Category, UserId};

/// Default markup applied to new users.
pub const DEFAULT_MARKUP_PERCENT: u32 = 20;

/// Default minimum number of idle days for the activity filter.
pub const DEFAULT_ACTIVITY_DAYS: u32 = 7;

// =============================================================================
// Filters
// =============================================================================

/// Minimum account inactivity required before relisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityFilter {
    /// No activity requirement.
    Any,
    /// Account idle for at least this many days.
    Days(u32),
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self::Days(DEFAULT_ACTIVITY_DAYS)
    }
}

impl std::fmt::Display for ActivityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Days(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for ActivityFilter {
    type Err = SettingsError;

    /// Parses `any` or a positive day count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        match s.parse::<u32>() {
            Ok(0) => Err(SettingsError::ActivityDaysZero),
            Ok(n) => Ok(Self::Days(n)),
            Err(_) => Err(SettingsError::InvalidFilter(s.to_string())),
        }
    }
}

/// Bucket on how long ago the listing was posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeFilter {
    /// Any posting age.
    #[default]
    Any,
    /// Posted within the last day.
    UpToDay,
    /// Posted within the last 7 days.
    UpToWeek,
    /// Posted within the last 30 days.
    UpToMonth,
    /// Posted more than 30 days ago.
    OverMonth,
}

impl AgeFilter {
    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::UpToDay => "up_to_day",
            Self::UpToWeek => "up_to_week",
            Self::UpToMonth => "up_to_month",
            Self::OverMonth => "over_month",
        }
    }
}

impl std::fmt::Display for AgeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgeFilter {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "any" => Ok(Self::Any),
            "up_to_day" | "day" => Ok(Self::UpToDay),
            "up_to_week" | "week" => Ok(Self::UpToWeek),
            "up_to_month" | "month" => Ok(Self::UpToMonth),
            "over_month" => Ok(Self::OverMonth),
            _ => Err(SettingsError::InvalidFilter(s.to_string())),
        }
    }
}

// =============================================================================
// Subscription Tier
// =============================================================================

/// Subscription tier, which caps the number of live offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// 20 active offers.
    #[default]
    Basic,
    /// 50 active offers.
    Premium,
    /// 100 active offers.
    Pro,
    /// Effectively unlimited.
    Owner,
}

impl Tier {
    /// Maximum number of simultaneously active offers.
    #[must_use]
    pub fn offer_limit(self) -> u32 {
        match self {
            Self::Basic => 20,
            Self::Premium => 50,
            Self::Pro => 100,
            Self::Owner => 9999,
        }
    }

    /// Returns the persisted string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Pro => "pro",
            Self::Owner => "owner",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "pro" => Ok(Self::Pro),
            "owner" => Ok(Self::Owner),
            other => Err(SettingsError::InvalidFilter(other.to_string())),
        }
    }
}

// =============================================================================
// User Settings
// =============================================================================

/// Validated relisting settings of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Owner.
    pub user_id: UserId,
    markup_percent: u32,
    price_min: Decimal,
    price_max: Decimal,
    categories: BTreeSet<Category>,
    activity_filter: ActivityFilter,
    age_filter: AgeFilter,
    tier: Tier,
}

impl UserSettings {
    /// Creates settings with the defaults a new user starts with.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            markup_percent: DEFAULT_MARKUP_PERCENT,
            price_min: dec!(1),
            price_max: dec!(100),
            categories: BTreeSet::new(),
            activity_filter: ActivityFilter::default(),
            age_filter: AgeFilter::default(),
            tier: Tier::default(),
        }
    }

    /// Sets the markup percent.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MarkupOutOfRange`] outside `1..=500`.
    pub fn with_markup(mut self, markup_percent: u32) -> Result<Self, SettingsError> {
        if !(1..=500).contains(&markup_percent) {
            return Err(SettingsError::MarkupOutOfRange(markup_percent));
        }
        self.markup_percent = markup_percent;
        Ok(self)
    }

    /// Sets the eligible source price range.
    ///
    /// # Errors
    ///
    /// Returns an error if `min < 1` or `max <= min`.
    pub fn with_price_range(mut self, min: Decimal, max: Decimal) -> Result<Self, SettingsError> {
        if min < Decimal::ONE {
            return Err(SettingsError::PriceMinTooLow(min));
        }
        if max <= min {
            return Err(SettingsError::PriceRangeInverted { min, max });
        }
        self.price_min = min;
        self.price_max = max;
        Ok(self)
    }

    /// Replaces the enabled categories.
    #[must_use]
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    /// Sets the activity filter.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::ActivityDaysZero`] for `Days(0)`.
    pub fn with_activity_filter(mut self, filter: ActivityFilter) -> Result<Self, SettingsError> {
        if filter == ActivityFilter::Days(0) {
            return Err(SettingsError::ActivityDaysZero);
        }
        self.activity_filter = filter;
        Ok(self)
    }

    /// Sets the age filter.
    #[must_use]
    pub fn with_age_filter(mut self, filter: AgeFilter) -> Self {
        self.age_filter = filter;
        self
    }

    /// Sets the subscription tier.
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    #[must_use]
    pub fn markup_percent(&self) -> u32 {
        self.markup_percent
    }

    #[must_use]
    pub fn price_min(&self) -> Decimal {
        self.price_min
    }

    #[must_use]
    pub fn price_max(&self) -> Decimal {
        self.price_max
    }

    #[must_use]
    pub fn categories(&self) -> &BTreeSet<Category> {
        &self.categories
    }

    #[must_use]
    pub fn activity_filter(&self) -> ActivityFilter {
        self.activity_filter
    }

    #[must_use]
    pub fn age_filter(&self) -> AgeFilter {
        self.age_filter
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Maximum number of live offers for this user.
    #[must_use]
    pub fn offer_limit(&self) -> u32 {
        self.tier.offer_limit()
    }
}
