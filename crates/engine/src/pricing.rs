//! Destination pricing and offer materialization.
//!
//! Prices are `Decimal` end to end and rounded half away from zero to cents,
//! so `20.00` at 25% is exactly `25.00` and the inverse recovers the source
//! price within one cent for any markup in `1..=500`.

use relist_core::{Listing, OfferContent};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::templates::FormatterRegistry;

fn markup_factor(markup_percent: u32) -> Decimal {
    Decimal::ONE + Decimal::from(markup_percent) / dec!(100)
}

fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Source price marked up and rounded to cents.
#[must_use]
pub fn destination_price(source_price: Decimal, markup_percent: u32) -> Decimal {
    round_cents(source_price * markup_factor(markup_percent))
}

/// Inverse of [`destination_price`], rounded to cents.
#[must_use]
pub fn recover_source_price(destination_price: Decimal, markup_percent: u32) -> Decimal {
    round_cents(destination_price / markup_factor(markup_percent))
}

/// Turns eligible listings into sink offer content.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    registry: FormatterRegistry,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(FormatterRegistry::with_defaults())
    }
}

impl PricingEngine {
    #[must_use]
    pub fn new(registry: FormatterRegistry) -> Self {
        Self { registry }
    }

    /// Builds title, description and price, or `None` if the listing's
    /// category has no formatter.
    #[must_use]
    pub fn materialize(&self, listing: &Listing, markup_percent: u32) -> Option<OfferContent> {
        let formatted = self.registry.format(listing)?;
        Some(OfferContent {
            title: formatted.title,
            description: formatted.description,
            destination_price: destination_price(listing.source_price, markup_percent),
            sink_category: formatted.sink_category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relist_core::Category;

    #[test]
    fn test_twenty_at_twenty_five_percent() {
        assert_eq!(destination_price(dec!(20.00), 25), dec!(25.00));
    }

    #[test]
    fn test_rounds_half_up() {
        // 10.01 * 1.25 = 12.5125
        assert_eq!(destination_price(dec!(10.01), 25), dec!(12.51));
        // 0.99 * 1.5 = 1.485
        assert_eq!(destination_price(dec!(0.99), 50), dec!(1.49));
        // 3.33 * 1.15 = 3.8295
        assert_eq!(destination_price(dec!(3.33), 15), dec!(3.83));
    }

    #[test]
    fn test_inverse_within_one_cent_for_all_markups() {
        let prices = [
            dec!(1.00),
            dec!(1.37),
            dec!(9.99),
            dec!(20.00),
            dec!(33.33),
            dec!(99.95),
            dec!(149.01),
            dec!(999.99),
        ];
        for markup in 1..=500u32 {
            for price in prices {
                let dest = destination_price(price, markup);
                let back = recover_source_price(dest, markup);
                assert!(
                    (back - price).abs() <= dec!(0.01),
                    "markup {markup}: {price} -> {dest} -> {back}"
                );
            }
        }
    }

    #[test]
    fn test_materialize_steam_listing() {
        let engine = PricingEngine::default();
        let listing = Listing::new("X1", Category::Steam, dec!(20.00))
            .with_attribute("steam_level", "15")
            .with_attribute("steam_game_count", "50");

        let content = engine.materialize(&listing, 25).unwrap();
        assert_eq!(content.destination_price, dec!(25.00));
        assert_eq!(content.title, "50 games / 15 Level");
        assert_eq!(content.sink_category, "steam");
    }

    #[test]
    fn test_materialize_unregistered_category() {
        let engine = PricingEngine::default();
        let listing = Listing::new("B1", Category::BrawlStars, dec!(20.00));
        assert!(engine.materialize(&listing, 25).is_none());
    }
}
