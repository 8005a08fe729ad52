use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Relist.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from defaults, `config/Relist.toml` and `RELIST_`
    /// environment variables (`__` separates nested keys).
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH, None)
    }

    /// Loads configuration with a specific profile overlay
    /// (`config/Relist.{profile}.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH, Some(profile))
    }

    /// Loads configuration rooted at an explicit file. Missing files are
    /// skipped, so defaults always apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>, profile: Option<&str>) -> Result<AppConfig> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path));

        if let Some(profile) = profile {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Relist");
            let overlay = path.with_file_name(format!("{stem}.{profile}.toml"));
            figment = figment.merge(Toml::file(overlay));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed("RELIST_").split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load().expect("defaults load");
            assert_eq!(config, AppConfig::default());
            assert_eq!(config.scheduler.discovery_interval_secs, 600);
            assert_eq!(config.engine.max_attempts, 5);
            Ok(())
        });
    }

    #[test]
    fn test_toml_and_profile_overlay() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Relist.toml",
                r#"
                [lzt]
                requests_per_minute = 10

                [scheduler]
                sync_interval_secs = 60
                "#,
            )?;
            jail.create_file(
                "config/Relist.staging.toml",
                r#"
                [scheduler]
                sync_interval_secs = 30
                "#,
            )?;

            let base = ConfigLoader::load().expect("base load");
            assert_eq!(base.lzt.requests_per_minute, 10);
            assert_eq!(base.scheduler.sync_interval_secs, 60);
            assert_eq!(base.lzt.base_url, "https://api.zelenka.guru");

            let staging = ConfigLoader::load_with_profile("staging").expect("profile load");
            assert_eq!(staging.scheduler.sync_interval_secs, 30);
            assert_eq!(staging.lzt.requests_per_minute, 10);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("RELIST_DATABASE__URL", "sqlite://other.db");
            jail.set_env("RELIST_ENGINE__MAX_ATTEMPTS", "3");

            let config = ConfigLoader::load().expect("env load");
            assert_eq!(config.database.url, "sqlite://other.db");
            assert_eq!(config.engine.max_attempts, 3);
            Ok(())
        });
    }
}
