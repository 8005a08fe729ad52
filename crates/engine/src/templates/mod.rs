//! Per-category offer formatters.
//!
//! Each formatter turns a listing's attribute bag into a sink title and a
//! block of description lines. The [`FormatterRegistry`] is keyed by the
//! closed [`Category`] enum; a category with no formatter yields `None` and
//! the offer is filtered out instead of being published with generic text.

mod hoyoverse;
mod lol;
mod steam;
mod valorant;

pub use hoyoverse::HoyoverseFormatter;
pub use lol::LolFormatter;
pub use steam::SteamFormatter;
pub use valorant::ValorantFormatter;

use relist_core::{Category, Listing};
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum title length accepted by the sink.
pub const MAX_TITLE_CHARS: usize = 140;

/// First paragraph of every offer description.
pub const DESCRIPTION_PREAMBLE: &str = "It's Available, Click 'view more' to see details. \
Please don't hesitate to contact us, If you have any question.";

/// Last paragraph of every offer description.
pub const DESCRIPTION_CLOSING: &str =
    "For more detailed information about the account, feel free to contact me!";

// =============================================================================
// Formatter Trait
// =============================================================================

/// Renders sink content for one family of game accounts.
pub trait OfferFormatter: Send + Sync {
    /// Short offer title (clamped by the registry).
    fn title(&self, listing: &Listing) -> String;

    /// Category-specific description lines.
    fn details(&self, listing: &Listing) -> Vec<String>;

    /// Sink category identifier.
    fn sink_category(&self, category: Category) -> String {
        category.slug().to_string()
    }
}

/// Title and description produced by a formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedOffer {
    pub title: String,
    pub description: String,
    pub sink_category: String,
}

// =============================================================================
// Registry
// =============================================================================

/// Formatter lookup keyed by category.
#[derive(Clone, Default)]
pub struct FormatterRegistry {
    formatters: HashMap<Category, Arc<dyn OfferFormatter>>,
}

impl FormatterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in formatters. Minecraft, Brawl
    /// Stars and Clash of Clans are left unregistered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let hoyoverse: Arc<dyn OfferFormatter> = Arc::new(HoyoverseFormatter);
        Self::new()
            .with(Category::Steam, Arc::new(SteamFormatter))
            .with(Category::Valorant, Arc::new(ValorantFormatter))
            .with(Category::LeagueOfLegends, Arc::new(LolFormatter))
            .with(Category::GenshinImpact, Arc::clone(&hoyoverse))
            .with(Category::HonkaiStarRail, Arc::clone(&hoyoverse))
            .with(Category::ZenlessZoneZero, hoyoverse)
    }

    /// Registers (or replaces) the formatter for a category.
    #[must_use]
    pub fn with(mut self, category: Category, formatter: Arc<dyn OfferFormatter>) -> Self {
        self.formatters.insert(category, formatter);
        self
    }

    /// Returns true if the category has a formatter.
    #[must_use]
    pub fn is_registered(&self, category: Category) -> bool {
        self.formatters.contains_key(&category)
    }

    /// Formats a listing, or `None` if its category is unregistered.
    #[must_use]
    pub fn format(&self, listing: &Listing) -> Option<FormattedOffer> {
        let formatter = self.formatters.get(&listing.category)?;

        let mut title = formatter.title(listing).trim().to_string();
        if title.is_empty() {
            title = listing
                .title
                .clone()
                .unwrap_or_else(|| format!("{} account", listing.category.display_name()));
        }

        let mut description = String::from(DESCRIPTION_PREAMBLE);
        let details = formatter.details(listing);
        if !details.is_empty() {
            description.push_str("\n\n");
            description.push_str(&details.join("\n"));
        }
        description.push_str("\n\n");
        description.push_str(DESCRIPTION_CLOSING);

        Some(FormattedOffer {
            title: clamp_title(&title),
            description,
            sink_category: formatter.sink_category(listing.category),
        })
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut categories: Vec<_> = self.formatters.keys().map(|c| c.slug()).collect();
        categories.sort_unstable();
        f.debug_struct("FormatterRegistry")
            .field("categories", &categories)
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Truncates to [`MAX_TITLE_CHARS`] characters on a char boundary.
#[must_use]
pub fn clamp_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    title.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string()
}

/// Returns the first non-empty attribute among `keys`.
pub(crate) fn attr<'a>(listing: &'a Listing, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| listing.attribute(key))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Joins present segments with ` / `.
pub(crate) fn join_segments(segments: impl IntoIterator<Item = Option<String>>) -> String {
    segments.into_iter().flatten().collect::<Vec<_>>().join(" / ")
}

/// Appends `label: value` when the attribute is present.
pub(crate) fn push_line(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        lines.push(format!("{label}: {value}"));
    }
}
