//! Shared listing types for the relisting engine.
//!
//! A [`Listing`] is what the source marketplace (LZT) hands us: an immutable
//! snapshot of one game account that may be republished on the sink (G2G).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// =============================================================================
// User Identity
// =============================================================================

/// Internal identifier of a bot user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Category
// =============================================================================

/// Game categories the engine knows how to discover.
///
/// The slug doubles as the LZT market path segment and as the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Steam accounts.
    Steam,
    /// Riot Valorant accounts.
    Valorant,
    /// Riot League of Legends accounts.
    #[serde(rename = "lol")]
    LeagueOfLegends,
    /// HoYoverse Genshin Impact accounts.
    GenshinImpact,
    /// HoYoverse Honkai: Star Rail accounts.
    HonkaiStarRail,
    /// HoYoverse Zenless Zone Zero accounts.
    ZenlessZoneZero,
    /// Minecraft accounts.
    Minecraft,
    /// Supercell Brawl Stars accounts.
    BrawlStars,
    /// Supercell Clash of Clans accounts.
    ClashOfClans,
}

impl Category {
    /// Every known category, in display order.
    pub const ALL: [Category; 9] = [
        Self::Steam,
        Self::Valorant,
        Self::LeagueOfLegends,
        Self::GenshinImpact,
        Self::HonkaiStarRail,
        Self::ZenlessZoneZero,
        Self::Minecraft,
        Self::BrawlStars,
        Self::ClashOfClans,
    ];

    /// Returns the LZT slug.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Steam => "steam",
            Self::Valorant => "valorant",
            Self::LeagueOfLegends => "lol",
            Self::GenshinImpact => "genshin-impact",
            Self::HonkaiStarRail => "honkai-star-rail",
            Self::ZenlessZoneZero => "zenless-zone-zero",
            Self::Minecraft => "minecraft",
            Self::BrawlStars => "brawl-stars",
            Self::ClashOfClans => "clash-of-clans",
        }
    }

    /// Returns the human readable name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Steam => "Steam",
            Self::Valorant => "Valorant",
            Self::LeagueOfLegends => "LoL",
            Self::GenshinImpact => "Genshin Impact",
            Self::HonkaiStarRail => "Honkai: Star Rail",
            Self::ZenlessZoneZero => "Zenless Zone Zero",
            Self::Minecraft => "Minecraft",
            Self::BrawlStars => "Brawl Stars",
            Self::ClashOfClans => "Clash of Clans",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Error returned when parsing an unknown category slug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.slug() == needle)
            .ok_or(UnknownCategory(s.to_string()))
    }
}

// =============================================================================
// Listing
// =============================================================================

/// A candidate account discovered on the source marketplace.
///
/// Identity is `source_id`; a listing is never mutated after it is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Source marketplace item id.
    pub source_id: String,

    /// Category the listing was discovered under.
    pub category: Category,

    /// Asking price on the source marketplace (USD).
    pub source_price: Decimal,

    /// Source listing title, if the marketplace provided one.
    pub title: Option<String>,

    /// When the listing was put up for sale.
    pub posted_at: Option<DateTime<Utc>>,

    /// Last time the account itself was active in-game.
    pub last_activity_at: Option<DateTime<Utc>>,

    /// Opaque attribute bag consumed by the offer formatters.
    pub attributes: BTreeMap<String, String>,
}

impl Listing {
    /// Creates a listing with no timestamps and no attributes.
    #[must_use]
    pub fn new(source_id: impl Into<String>, category: Category, source_price: Decimal) -> Self {
        Self {
            source_id: source_id.into(),
            category,
            source_price,
            title: None,
            posted_at: None,
            last_activity_at: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the posting time.
    #[must_use]
    pub fn with_posted_at(mut self, posted_at: DateTime<Utc>) -> Self {
        self.posted_at = Some(posted_at);
        self
    }

    /// Sets the last account activity time.
    #[must_use]
    pub fn with_last_activity_at(mut self, last_activity_at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(last_activity_at);
        self
    }

    /// Sets the source title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Adds one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Looks up an attribute by key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
