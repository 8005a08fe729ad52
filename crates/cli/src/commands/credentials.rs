//! Store marketplace credentials and check them against the live APIs.

use anyhow::{bail, Context, Result};
use clap::Args;
use relist_core::{G2gCredentials, LztCredentials, UserId};
use relist_g2g::G2gClient;
use relist_lzt::LztClient;

use crate::app::App;

/// Arguments for the credentials command.
#[derive(Args, Debug, Clone)]
pub struct CredentialsArgs {
    /// User id
    #[arg(long)]
    pub user: i64,

    /// LZT market API token
    #[arg(long, env = "RELIST_LZT_TOKEN", hide_env_values = true)]
    pub lzt_token: Option<String>,

    /// G2G API key
    #[arg(long, env = "RELIST_G2G_API_KEY", hide_env_values = true)]
    pub g2g_api_key: Option<String>,

    /// G2G API secret
    #[arg(long, env = "RELIST_G2G_API_SECRET", hide_env_values = true)]
    pub g2g_api_secret: Option<String>,

    /// G2G seller id
    #[arg(long)]
    pub g2g_user_id: Option<String>,

    /// Call both APIs with the stored credentials
    #[arg(long)]
    pub check: bool,
}

/// Saves whichever credentials were given, then optionally tests them.
///
/// # Errors
/// Returns an error if the G2G triple is incomplete, the user is unknown,
/// or a connection test fails.
pub async fn run_credentials(app: &App, args: CredentialsArgs) -> Result<()> {
    let user_id = UserId(args.user);
    let users = app.users();

    let g2g = match (args.g2g_api_key, args.g2g_api_secret, args.g2g_user_id) {
        (Some(key), Some(secret), Some(seller)) => Some(G2gCredentials::new(key, secret, seller)),
        (None, None, None) => None,
        _ => bail!("--g2g-api-key, --g2g-api-secret and --g2g-user-id must be given together"),
    };

    if let Some(token) = args.lzt_token {
        users
            .save_lzt_credentials(user_id, &LztCredentials::new(token))
            .await
            .with_context(|| format!("failed to save LZT token; is user {user_id} registered?"))?;
        println!("Saved LZT token for user {user_id}");
    }
    if let Some(g2g) = g2g {
        users
            .save_g2g_credentials(user_id, &g2g)
            .await
            .with_context(|| format!("failed to save G2G keys; is user {user_id} registered?"))?;
        println!("Saved G2G keys for user {user_id}");
    }

    if !args.check {
        return Ok(());
    }

    let stored = users.load_credentials(user_id).await?;
    let mut failures = 0;

    match stored.lzt {
        Some(lzt) => match LztClient::new(app.lzt_config(), lzt)?.test_connection().await {
            Ok(()) => println!("LZT: ok"),
            Err(e) => {
                failures += 1;
                println!("LZT: {e}");
            }
        },
        None => println!("LZT: not configured"),
    }
    match stored.g2g {
        Some(g2g) => match G2gClient::new(app.g2g_config(), g2g)?.test_connection().await {
            Ok(()) => println!("G2G: ok"),
            Err(e) => {
                failures += 1;
                println!("G2G: {e}");
            }
        },
        None => println!("G2G: not configured"),
    }

    if failures > 0 {
        bail!("{failures} connection test(s) failed");
    }
    Ok(())
}
