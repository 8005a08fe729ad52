//! Register users and toggle whether the scheduler runs for them.

use anyhow::Result;
use clap::Subcommand;
use relist_core::{Tier, UserId};

use crate::app::App;

#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommand {
    /// Register a user or change their tier
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "basic")]
        tier: Tier,
    },
    /// List users the scheduler runs for
    List,
    /// Resume scheduling for a user
    Activate {
        #[arg(long)]
        user: i64,
    },
    /// Stop scheduling for a user; stored offers are kept
    Deactivate {
        #[arg(long)]
        user: i64,
    },
}

/// Runs a users subcommand.
///
/// # Errors
/// Returns an error if the user is unknown or the store operation fails.
pub async fn run_users(app: &App, command: UsersCommand) -> Result<()> {
    let users = app.users();
    match command {
        UsersCommand::Add { user, tier } => {
            users.upsert_user(UserId(user), tier).await?;
            println!("User {user} registered ({tier})");
        }
        UsersCommand::List => {
            let active = users.active_users().await?;
            if active.is_empty() {
                println!("No active users");
            }
            for user_id in active {
                let configured = users.load_settings(user_id).await?.is_some();
                let (lzt, g2g) = {
                    let creds = users.load_credentials(user_id).await?;
                    (creds.lzt.is_some(), creds.g2g.is_some())
                };
                println!(
                    "{user_id}\tsettings={}\tlzt={}\tg2g={}",
                    yes_no(configured),
                    yes_no(lzt),
                    yes_no(g2g)
                );
            }
        }
        UsersCommand::Activate { user } => {
            users.set_active(UserId(user), true).await?;
            println!("User {user} activated");
        }
        UsersCommand::Deactivate { user } => {
            users.set_active(UserId(user), false).await?;
            println!("User {user} deactivated");
        }
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
