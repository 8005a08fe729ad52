use relist_core::Listing;

use super::{attr, join_segments, push_line, OfferFormatter};

/// Riot League of Legends accounts.
pub struct LolFormatter;

impl OfferFormatter for LolFormatter {
    fn title(&self, listing: &Listing) -> String {
        join_segments([
            attr(listing, &["riot_lol_region"]).map(str::to_uppercase),
            attr(listing, &["riot_lol_level"]).map(|n| format!("Level {n}")),
            attr(listing, &["riot_lol_rank"]).map(str::to_string),
            attr(listing, &["riot_lol_champion_count"]).map(|n| format!("Champions: {n}")),
            attr(listing, &["riot_lol_skin_count"]).map(|n| format!("Skins: {n}")),
        ])
    }

    fn details(&self, listing: &Listing) -> Vec<String> {
        let mut lines = vec!["League of Legends Account Details:".to_string()];
        push_line(&mut lines, "Region", attr(listing, &["riot_lol_region"]));
        push_line(&mut lines, "Level", attr(listing, &["riot_lol_level"]));
        push_line(&mut lines, "Rank", attr(listing, &["riot_lol_rank"]));
        push_line(&mut lines, "Champions", attr(listing, &["riot_lol_champion_count"]));
        push_line(&mut lines, "Skins", attr(listing, &["riot_lol_skin_count"]));
        push_line(&mut lines, "Blue Essence", attr(listing, &["riot_lol_wallet_blue"]));
        push_line(&mut lines, "Riot Points", attr(listing, &["riot_lol_wallet_rp"]));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relist_core::Category;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lol_title_and_details() {
        let listing = Listing::new("L1", Category::LeagueOfLegends, dec!(12))
            .with_attribute("riot_lol_region", "euw")
            .with_attribute("riot_lol_level", "112")
            .with_attribute("riot_lol_champion_count", "88");

        assert_eq!(LolFormatter.title(&listing), "EUW / Level 112 / Champions: 88");
        let details = LolFormatter.details(&listing);
        assert_eq!(details.len(), 4);
        assert_eq!(details[3], "Champions: 88");
    }
}
