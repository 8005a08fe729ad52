//! Listing eligibility rules.
//!
//! [`evaluate`] is a pure function of `(listing, settings, now)`. The
//! [`FilterEngine`] wrapper adds a counter of listings rejected because their
//! timestamps were missing or in the future, which is the only signal the
//! caller gets for malformed input.
//!
//! # Example
//!
//! ```ignore
//! use relist_engine::filter::FilterEngine;
//!
//! let engine = FilterEngine::new();
//! if engine.is_eligible(&listing, &settings, Utc::now()) {
//!     // price and publish
//! }
//! println!("malformed listings so far: {}", engine.filter_errors());
//! ```

use chrono::{DateTime, Duration, Utc};
use relist_core::{ActivityFilter, AgeFilter, Category, Listing, UserSettings};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Decision Types
// =============================================================================

/// Which listing timestamp a rule looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// `last_activity_at`.
    LastActivity,
    /// `posted_at`.
    Posted,
}

impl std::fmt::Display for TimestampField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LastActivity => write!(f, "last_activity_at"),
            Self::Posted => write!(f, "posted_at"),
        }
    }
}

/// Why a listing was not eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    /// Source price outside the configured range.
    PriceOutOfRange {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },
    /// Category not enabled for this user.
    CategoryDisabled(Category),
    /// Account was active too recently.
    RecentlyActive { idle_days: i64, required_days: u32 },
    /// Posting age does not fall in the configured bucket.
    AgeMismatch { filter: AgeFilter, age_days: i64 },
    /// Timestamp required by an active filter is missing.
    MissingTimestamp(TimestampField),
    /// Timestamp required by an active filter is after `now`.
    FutureTimestamp(TimestampField),
}

impl FilterRejection {
    /// Returns true if the rejection was caused by malformed listing data.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MissingTimestamp(_) | Self::FutureTimestamp(_))
    }
}

impl std::fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceOutOfRange { price, min, max } => {
                write!(f, "price {price} outside [{min}, {max}]")
            }
            Self::CategoryDisabled(category) => write!(f, "category {category} not enabled"),
            Self::RecentlyActive {
                idle_days,
                required_days,
            } => write!(f, "idle {idle_days}d, need {required_days}d"),
            Self::AgeMismatch { filter, age_days } => {
                write!(f, "posted {age_days}d ago, filter {filter}")
            }
            Self::MissingTimestamp(field) => write!(f, "missing {field}"),
            Self::FutureTimestamp(field) => write!(f, "{field} is in the future"),
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Eligible,
    Rejected(FilterRejection),
}

impl FilterDecision {
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Applies every rule in order and returns the first rejection.
#[must_use]
pub fn evaluate(listing: &Listing, settings: &UserSettings, now: DateTime<Utc>) -> FilterDecision {
    match check(listing, settings, now) {
        Ok(()) => FilterDecision::Eligible,
        Err(rejection) => FilterDecision::Rejected(rejection),
    }
}

fn check(listing: &Listing, settings: &UserSettings, now: DateTime<Utc>) -> Result<(), FilterRejection> {
    let (min, max) = (settings.price_min(), settings.price_max());
    if listing.source_price < min || listing.source_price > max {
        return Err(FilterRejection::PriceOutOfRange {
            price: listing.source_price,
            min,
            max,
        });
    }

    if !settings.categories().contains(&listing.category) {
        return Err(FilterRejection::CategoryDisabled(listing.category));
    }

    if let ActivityFilter::Days(required_days) = settings.activity_filter() {
        let idle = elapsed_since(listing.last_activity_at, now, TimestampField::LastActivity)?;
        if idle < Duration::days(i64::from(required_days)) {
            return Err(FilterRejection::RecentlyActive {
                idle_days: idle.num_days(),
                required_days,
            });
        }
    }

    let age_filter = settings.age_filter();
    if age_filter != AgeFilter::Any {
        let age = elapsed_since(listing.posted_at, now, TimestampField::Posted)?;
        if !age_matches(age_filter, age) {
            return Err(FilterRejection::AgeMismatch {
                filter: age_filter,
                age_days: age.num_days(),
            });
        }
    }

    Ok(())
}

fn elapsed_since(
    at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    field: TimestampField,
) -> Result<Duration, FilterRejection> {
    let at = at.ok_or(FilterRejection::MissingTimestamp(field))?;
    if at > now {
        return Err(FilterRejection::FutureTimestamp(field));
    }
    Ok(now - at)
}

fn age_matches(filter: AgeFilter, age: Duration) -> bool {
    match filter {
        AgeFilter::Any => true,
        AgeFilter::UpToDay => age <= Duration::days(1),
        AgeFilter::UpToWeek => age <= Duration::days(7),
        AgeFilter::UpToMonth => age <= Duration::days(30),
        AgeFilter::OverMonth => age > Duration::days(30),
    }
}

// =============================================================================
// Filter Engine
// =============================================================================

/// Stateless rule evaluation plus a malformed-input counter.
#[derive(Debug, Default)]
pub struct FilterEngine {
    filter_errors: AtomicU64,
}

impl FilterEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the listing passes every rule.
    pub fn is_eligible(&self, listing: &Listing, settings: &UserSettings, now: DateTime<Utc>) -> bool {
        self.decide(listing, settings, now).is_eligible()
    }

    /// Same as [`evaluate`], counting malformed rejections.
    pub fn decide(&self, listing: &Listing, settings: &UserSettings, now: DateTime<Utc>) -> FilterDecision {
        let decision = evaluate(listing, settings, now);
        if let FilterDecision::Rejected(rejection) = &decision {
            if rejection.is_malformed() {
                self.filter_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    source_id = %listing.source_id,
                    reason = %rejection,
                    "listing rejected on malformed timestamp"
                );
            }
        }
        decision
    }

    /// Number of listings rejected for malformed timestamps.
    #[must_use]
    pub fn filter_errors(&self) -> u64 {
        self.filter_errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relist_core::UserId;
    use rust_decimal_macros::dec;

    fn settings() -> UserSettings {
        UserSettings::new(UserId(1))
            .with_price_range(dec!(10), dec!(50))
            .unwrap()
            .with_categories([Category::Steam, Category::Valorant])
            .with_activity_filter(ActivityFilter::Any)
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    // ==== Price Tests ====

    #[test]
    fn test_price_below_min_not_eligible() {
        let listing = Listing::new("X1", Category::Steam, dec!(5.00));
        let decision = evaluate(&listing, &settings(), now());
        assert!(matches!(
            decision,
            FilterDecision::Rejected(FilterRejection::PriceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_price_bounds_inclusive() {
        let s = settings();
        assert!(evaluate(&Listing::new("a", Category::Steam, dec!(10)), &s, now()).is_eligible());
        assert!(evaluate(&Listing::new("b", Category::Steam, dec!(50)), &s, now()).is_eligible());
        assert!(!evaluate(&Listing::new("c", Category::Steam, dec!(50.01)), &s, now()).is_eligible());
    }

    #[test]
    fn test_category_not_enabled() {
        let listing = Listing::new("X1", Category::Minecraft, dec!(20));
        assert_eq!(
            evaluate(&listing, &settings(), now()),
            FilterDecision::Rejected(FilterRejection::CategoryDisabled(Category::Minecraft))
        );
    }

    // ==== Activity Tests ====

    #[test]
    fn test_activity_filter_requires_idle_days() {
        let s = settings().with_activity_filter(ActivityFilter::Days(7)).unwrap();
        let idle = Listing::new("a", Category::Steam, dec!(20))
            .with_last_activity_at(now() - Duration::days(8));
        let exact = Listing::new("b", Category::Steam, dec!(20))
            .with_last_activity_at(now() - Duration::days(7));
        let recent = Listing::new("c", Category::Steam, dec!(20))
            .with_last_activity_at(now() - Duration::days(2));

        assert!(evaluate(&idle, &s, now()).is_eligible());
        assert!(evaluate(&exact, &s, now()).is_eligible());
        assert!(matches!(
            evaluate(&recent, &s, now()),
            FilterDecision::Rejected(FilterRejection::RecentlyActive {
                idle_days: 2,
                required_days: 7
            })
        ));
    }

    #[test]
    fn test_activity_any_ignores_missing_timestamp() {
        let listing = Listing::new("a", Category::Steam, dec!(20));
        let engine = FilterEngine::new();
        assert!(engine.is_eligible(&listing, &settings(), now()));
        assert_eq!(engine.filter_errors(), 0);
    }

    // ==== Age Tests ====

    #[test]
    fn test_age_buckets() {
        let listing = |days: i64| {
            Listing::new("a", Category::Steam, dec!(20)).with_posted_at(now() - Duration::days(days))
        };
        let with = |filter| settings().with_age_filter(filter);

        assert!(evaluate(&listing(1), &with(AgeFilter::UpToDay), now()).is_eligible());
        assert!(!evaluate(&listing(2), &with(AgeFilter::UpToDay), now()).is_eligible());
        assert!(evaluate(&listing(7), &with(AgeFilter::UpToWeek), now()).is_eligible());
        assert!(!evaluate(&listing(8), &with(AgeFilter::UpToWeek), now()).is_eligible());
        assert!(evaluate(&listing(30), &with(AgeFilter::UpToMonth), now()).is_eligible());
        assert!(!evaluate(&listing(30), &with(AgeFilter::OverMonth), now()).is_eligible());
        assert!(evaluate(&listing(31), &with(AgeFilter::OverMonth), now()).is_eligible());
    }

    // ==== Malformed Input Tests ====

    #[test]
    fn test_missing_timestamp_counts_filter_error() {
        let s = settings().with_activity_filter(ActivityFilter::Days(7)).unwrap();
        let listing = Listing::new("a", Category::Steam, dec!(20));
        let engine = FilterEngine::new();

        assert!(!engine.is_eligible(&listing, &s, now()));
        assert_eq!(engine.filter_errors(), 1);
    }

    #[test]
    fn test_future_timestamp_counts_filter_error() {
        let s = settings().with_age_filter(AgeFilter::UpToWeek);
        let listing = Listing::new("a", Category::Steam, dec!(20))
            .with_posted_at(now() + Duration::hours(3));
        let engine = FilterEngine::new();

        assert_eq!(
            engine.decide(&listing, &s, now()),
            FilterDecision::Rejected(FilterRejection::FutureTimestamp(TimestampField::Posted))
        );
        assert_eq!(engine.filter_errors(), 1);
    }

    #[test]
    fn test_business_rejection_does_not_count_error() {
        let engine = FilterEngine::new();
        let listing = Listing::new("a", Category::Steam, dec!(5));
        assert!(!engine.is_eligible(&listing, &settings(), now()));
        assert_eq!(engine.filter_errors(), 0);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let s = settings().with_activity_filter(ActivityFilter::Days(3)).unwrap();
        let listing = Listing::new("a", Category::Valorant, dec!(25))
            .with_last_activity_at(now() - Duration::days(4));
        let first = evaluate(&listing, &s, now());
        for _ in 0..10 {
            assert_eq!(evaluate(&listing, &s, now()), first);
        }
    }
}
