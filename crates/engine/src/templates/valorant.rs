use relist_core::Listing;

use super::{attr, join_segments, push_line, OfferFormatter};

/// Riot Valorant accounts.
pub struct ValorantFormatter;

impl OfferFormatter for ValorantFormatter {
    fn title(&self, listing: &Listing) -> String {
        join_segments([
            attr(listing, &["riot_valorant_region"]).map(str::to_uppercase),
            attr(listing, &["riot_valorant_rank"]).map(str::to_string),
            attr(listing, &["riot_valorant_skin_count"]).map(|n| format!("Skins: {n}")),
            attr(listing, &["riot_valorant_agent_count"]).map(|n| format!("Agents: {n}")),
            attr(listing, &["riot_valorant_inventory_value"]).map(|n| format!("Inv Value: {n}VP")),
        ])
    }

    fn details(&self, listing: &Listing) -> Vec<String> {
        let mut lines = vec!["Valorant Account Details:".to_string()];
        push_line(&mut lines, "Region", attr(listing, &["riot_valorant_region"]));
        push_line(&mut lines, "Level", attr(listing, &["riot_valorant_level"]));
        push_line(&mut lines, "Rank", attr(listing, &["riot_valorant_rank"]));
        push_line(&mut lines, "Agents Unlocked", attr(listing, &["riot_valorant_agent_count"]));
        push_line(&mut lines, "Skins Owned", attr(listing, &["riot_valorant_skin_count"]));
        push_line(&mut lines, "Inventory Value", attr(listing, &["riot_valorant_inventory_value"]));
        push_line(&mut lines, "Wallet VP", attr(listing, &["riot_valorant_wallet_vp"]));
        lines
    }
}
