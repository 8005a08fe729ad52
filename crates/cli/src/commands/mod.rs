//! CLI commands for the relisting engine.

pub mod credentials;
pub mod cycle;
pub mod run;
pub mod settings;
pub mod stats;
pub mod users;

pub use credentials::{run_credentials, CredentialsArgs};
pub use cycle::{run_one_cycle, CycleArgs};
pub use run::run_daemon;
pub use settings::{run_settings, SettingsCommand};
pub use stats::{run_stats, StatsArgs};
pub use users::{run_users, UsersCommand};
