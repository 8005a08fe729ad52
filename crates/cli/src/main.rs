use anyhow::Result;
use clap::{Parser, Subcommand};
use relist_core::ConfigLoader;
use relist_scheduler::CycleKind;

mod app;
mod commands;

use app::App;
use commands::{CredentialsArgs, CycleArgs, SettingsCommand, StatsArgs, UsersCommand};

#[derive(Parser)]
#[command(name = "relist")]
#[command(about = "Relists LZT market accounts as G2G offers", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = relist_core::config_loader::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Config profile layered over the base file (e.g. "prod")
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and sync on their intervals until interrupted
    Run,
    /// Run one discovery cycle now
    Discover(CycleArgs),
    /// Run one order-sync cycle now
    Sync(CycleArgs),
    /// Show offer and order statistics
    Stats(StatsArgs),
    /// Show or change relisting settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Save marketplace credentials and test them
    Credentials(CredentialsArgs),
    /// Manage users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Print a fresh credential encryption key
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    if matches!(cli.command, Commands::Keygen) {
        println!("{}", relist_store::CredentialCipher::generate_key());
        eprintln!("Export it as {} before saving credentials.", relist_store::CREDENTIAL_KEY_ENV);
        return Ok(());
    }

    let config = ConfigLoader::load_from(&cli.config, cli.profile.as_deref())?;
    let app = App::open(config).await?;

    match cli.command {
        Commands::Run => commands::run_daemon(app).await?,
        Commands::Discover(args) => commands::run_one_cycle(&app, CycleKind::Discovery, args).await?,
        Commands::Sync(args) => commands::run_one_cycle(&app, CycleKind::Sync, args).await?,
        Commands::Stats(args) => commands::run_stats(&app, args).await?,
        Commands::Settings { command } => commands::run_settings(&app, command).await?,
        Commands::Credentials(args) => commands::run_credentials(&app, args).await?,
        Commands::Users { command } => commands::run_users(&app, command).await?,
        Commands::Keygen => {}
    }

    Ok(())
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
