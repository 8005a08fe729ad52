//! Offer and order counters for one user.

use anyhow::{anyhow, Result};
use clap::Args;
use relist_core::UserId;
use relist_engine::{OfferStats, OrderStats};
use serde::Serialize;

use crate::app::App;

/// Arguments for the stats command.
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// User id
    #[arg(long)]
    pub user: i64,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatsView {
    user_id: UserId,
    tier: String,
    offers: OfferStats,
    orders: OrderStats,
}

/// Prints offer and order statistics.
///
/// # Errors
/// Returns an error if the user has no settings or the store query fails.
pub async fn run_stats(app: &App, args: StatsArgs) -> Result<()> {
    let user_id = UserId(args.user);
    let settings = app
        .users()
        .load_settings(user_id)
        .await?
        .ok_or_else(|| anyhow!("user {user_id} has no settings; run `relist settings set` first"))?;

    let view = StatsView {
        user_id,
        tier: settings.tier().to_string(),
        offers: app.reconciler.offer_stats(&settings).await?,
        orders: app.reconciler.order_stats(user_id).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render(&view));
    }
    Ok(())
}

fn render(view: &StatsView) -> String {
    let offers = &view.offers;
    let orders = &view.orders;
    format!(
        "User {} ({})\n\
         Offers\n  total           {}\n  active          {} / {} ({} free)\n  sold            {}\n  publish failed  {}\n  failed          {}\n\
         Orders\n  new             {}\n  processing      {}\n  delivered       {}\n  cancelled       {}\n  failed          {}\n",
        view.user_id,
        view.tier,
        offers.total,
        offers.active,
        offers.limit,
        offers.remaining(),
        offers.sold,
        offers.publish_failed,
        offers.failed,
        orders.new,
        orders.processing,
        orders.delivered,
        orders.cancelled,
        orders.failed,
    )
}
