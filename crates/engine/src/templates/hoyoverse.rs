//! Shared formatter for HoYoverse titles. The three games expose the same
//! attribute shape under different key prefixes and level names.

use relist_core::{Category, Listing};

use super::{attr, join_segments, push_line, OfferFormatter};

/// Genshin Impact, Honkai: Star Rail and Zenless Zone Zero accounts.
pub struct HoyoverseFormatter;

struct GameKeys {
    prefix: &'static str,
    level_label: &'static str,
}

fn keys_for(category: Category) -> GameKeys {
    match category {
        Category::HonkaiStarRail => GameKeys {
            prefix: "honkai",
            level_label: "Trailblaze Level",
        },
        Category::ZenlessZoneZero => GameKeys {
            prefix: "zenless",
            level_label: "Inter-Knot Level",
        },
        _ => GameKeys {
            prefix: "genshin",
            level_label: "Adventure Rank",
        },
    }
}

fn game_attr<'a>(listing: &'a Listing, keys: &GameKeys, field: &str) -> Option<&'a str> {
    let key = format!("{}_{field}", keys.prefix);
    attr(listing, &[key.as_str()])
}

impl OfferFormatter for HoyoverseFormatter {
    fn title(&self, listing: &Listing) -> String {
        let keys = keys_for(listing.category);
        join_segments([
            Some(listing.category.display_name().to_string()),
            game_attr(listing, &keys, "region").map(str::to_uppercase),
            game_attr(listing, &keys, "level").map(|n| format!("{} {n}", keys.level_label)),
            game_attr(listing, &keys, "legendary_count").map(|n| format!("5* Characters: {n}")),
        ])
    }

    fn details(&self, listing: &Listing) -> Vec<String> {
        let keys = keys_for(listing.category);
        let mut lines = vec![format!("{} Account Details:", listing.category.display_name())];
        push_line(&mut lines, "Server", game_attr(listing, &keys, "region"));
        push_line(&mut lines, keys.level_label, game_attr(listing, &keys, "level"));
        push_line(&mut lines, "Characters", game_attr(listing, &keys, "character_count"));
        push_line(&mut lines, "5* Characters", game_attr(listing, &keys, "legendary_count"));
        push_line(&mut lines, "Characters List", game_attr(listing, &keys, "characters"));
        lines
    }
}
