use relist_core::Listing;

use super::{attr, join_segments, push_line, OfferFormatter};

/// Steam library accounts.
pub struct SteamFormatter;

impl OfferFormatter for SteamFormatter {
    fn title(&self, listing: &Listing) -> String {
        let games = attr(listing, &["steam_game_count"]).map(|n| format!("{n} games"));
        let level = attr(listing, &["steam_level"]).map(|n| format!("{n} Level"));
        let country = attr(listing, &["steam_country"]).map(str::to_string);
        let top_games = attr(listing, &["steam_games"]).map(|games| {
            games
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .take(3)
                .collect::<Vec<_>>()
                .join(", ")
        });
        join_segments([games, level, country, top_games.filter(|g| !g.is_empty())])
    }

    fn details(&self, listing: &Listing) -> Vec<String> {
        let mut lines = Vec::new();
        push_line(&mut lines, "Steam Level", attr(listing, &["steam_level"]));
        push_line(&mut lines, "Game Count", attr(listing, &["steam_game_count"]));
        push_line(&mut lines, "Country", attr(listing, &["steam_country"]));
        push_line(&mut lines, "Account Created", attr(listing, &["steam_register_date"]));

        if let Some(games) = attr(listing, &["steam_games"]) {
            lines.push(String::new());
            lines.push("Games:".to_string());
            lines.extend(
                games
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string),
            );
        }
        lines
    }
}
