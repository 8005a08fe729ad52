//! Show and update a user's relisting settings.

use anyhow::Result;
use clap::{Args, Subcommand};
use relist_core::{ActivityFilter, AgeFilter, Category, SettingsError, Tier, UserId, UserSettings};
use rust_decimal::Decimal;

use crate::app::App;

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print current settings
    Show {
        /// User id
        #[arg(long)]
        user: i64,
    },
    /// Update settings; omitted fields keep their value
    Set(SetSettingsArgs),
}

/// Arguments for `settings set`.
#[derive(Args, Debug, Clone, Default)]
pub struct SetSettingsArgs {
    /// User id
    #[arg(long)]
    pub user: i64,

    /// Markup percent (1-500)
    #[arg(long)]
    pub markup: Option<u32>,

    /// Minimum source price
    #[arg(long)]
    pub price_min: Option<Decimal>,

    /// Maximum source price
    #[arg(long)]
    pub price_max: Option<Decimal>,

    /// Comma-separated category slugs (e.g. "steam,fortnite")
    #[arg(long, value_delimiter = ',')]
    pub categories: Option<Vec<Category>>,

    /// Minimum idle days, or "any"
    #[arg(long)]
    pub activity: Option<ActivityFilter>,

    /// Posting age bucket: any, day, week, month, over_month
    #[arg(long)]
    pub age: Option<AgeFilter>,

    /// Subscription tier: basic, premium, pro, owner
    #[arg(long)]
    pub tier: Option<Tier>,
}

/// Runs a settings subcommand.
///
/// # Errors
/// Returns an error if validation or the store operation fails.
pub async fn run_settings(app: &App, command: SettingsCommand) -> Result<()> {
    let users = app.users();
    match command {
        SettingsCommand::Show { user } => {
            let user_id = UserId(user);
            match users.load_settings(user_id).await? {
                Some(settings) => print!("{}", render(&settings)),
                None => println!("User {user_id} has no settings (defaults apply on first `settings set`)"),
            }
        }
        SettingsCommand::Set(args) => {
            let user_id = UserId(args.user);
            let current = users
                .load_settings(user_id)
                .await?
                .unwrap_or_else(|| UserSettings::new(user_id));
            let updated = apply(current, &args)?;
            users.save_settings(&updated).await?;
            tracing::info!(user_id = %user_id, "settings updated");
            print!("{}", render(&updated));
        }
    }
    Ok(())
}

/// Applies the given fields through the validating builders.
fn apply(settings: UserSettings, args: &SetSettingsArgs) -> Result<UserSettings, SettingsError> {
    let mut settings = settings;
    if let Some(markup) = args.markup {
        settings = settings.with_markup(markup)?;
    }
    if args.price_min.is_some() || args.price_max.is_some() {
        let min = args.price_min.unwrap_or(settings.price_min());
        let max = args.price_max.unwrap_or(settings.price_max());
        settings = settings.with_price_range(min, max)?;
    }
    if let Some(categories) = &args.categories {
        settings = settings.with_categories(categories.iter().copied());
    }
    if let Some(activity) = args.activity {
        settings = settings.with_activity_filter(activity)?;
    }
    if let Some(age) = args.age {
        settings = settings.with_age_filter(age);
    }
    if let Some(tier) = args.tier {
        settings = settings.with_tier(tier);
    }
    Ok(settings)
}

fn render(settings: &UserSettings) -> String {
    let categories = settings
        .categories()
        .iter()
        .map(|c| c.slug())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "User {}\n  markup      {}%\n  price       {} - {}\n  categories  {}\n  activity    {}\n  age         {}\n  tier        {} ({} offers)\n",
        settings.user_id,
        settings.markup_percent(),
        settings.price_min(),
        settings.price_max(),
        if categories.is_empty() { "-".to_string() } else { categories },
        settings.activity_filter(),
        settings.age_filter(),
        settings.tier(),
        settings.offer_limit(),
    )
}
