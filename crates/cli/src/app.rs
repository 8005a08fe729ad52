//! Process wiring: database, reconciler, scheduler and per-user adapters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use relist_core::{AppConfig, UserId, UserSettings};
use relist_engine::{OfferStore, Reconciler, ReconcilerConfig};
use relist_g2g::{G2gClient, G2gClientConfig};
use relist_lzt::{LztClient, LztClientConfig};
use relist_scheduler::{AdapterFactory, Scheduler, UserAdapters, UserDirectory};
use relist_store::{CipherError, CredentialCipher, Database, UserRepository};
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs, built once from [`AppConfig`].
pub struct App {
    pub config: AppConfig,
    pub database: Database,
    pub reconciler: Arc<Reconciler>,
}

impl App {
    /// Connects to the database, runs migrations and builds the reconciler.
    ///
    /// Without a credential key the app still opens, but saving or loading
    /// credentials fails.
    pub async fn open(config: AppConfig) -> Result<Self> {
        ensure_sqlite_dir(&config.database.url)?;

        let mut database = Database::from_config(&config.database)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?;

        match CredentialCipher::from_env() {
            Ok(cipher) => database = database.with_credential_cipher(cipher),
            Err(CipherError::MissingKey) => tracing::warn!(
                env = relist_store::CREDENTIAL_KEY_ENV,
                "no credential key; credentials cannot be saved or loaded"
            ),
            Err(e) => return Err(e).context("invalid credential key"),
        }

        let store: Arc<dyn OfferStore> = Arc::new(database.offer_store());
        let reconciler = Arc::new(
            Reconciler::new(store).with_config(ReconcilerConfig::from_engine_config(&config.engine)),
        );

        Ok(Self {
            config,
            database,
            reconciler,
        })
    }

    #[must_use]
    pub fn users(&self) -> UserRepository {
        self.database.users()
    }

    #[must_use]
    pub fn lzt_config(&self) -> LztClientConfig {
        LztClientConfig::from_config(&self.config.lzt)
            .with_timeout_secs(self.config.engine.adapter_timeout_secs)
    }

    #[must_use]
    pub fn g2g_config(&self) -> G2gClientConfig {
        G2gClientConfig::from_config(&self.config.g2g)
            .with_timeout_secs(self.config.engine.adapter_timeout_secs)
    }

    /// Scheduler over the stored users and their credentials.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        let directory = Arc::new(StoreDirectory::new(
            self.users(),
            self.lzt_config(),
            self.g2g_config(),
        ));
        Scheduler::new(
            Arc::clone(&self.reconciler),
            directory.clone(),
            directory,
            self.config.scheduler.clone(),
        )
    }
}

/// Creates the parent directory of a file-backed `sqlite://` URL.
pub fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tracing::info!(dir = %parent.display(), "creating database directory");
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

// =============================================================================
// Store-backed directory
// =============================================================================

/// Resolves users, settings and clients from the store.
///
/// Clients are built fresh per cycle so credential updates take effect on
/// the next tick.
pub struct StoreDirectory {
    users: UserRepository,
    lzt: LztClientConfig,
    g2g: G2gClientConfig,
}

impl StoreDirectory {
    #[must_use]
    pub fn new(users: UserRepository, lzt: LztClientConfig, g2g: G2gClientConfig) -> Self {
        Self { users, lzt, g2g }
    }
}

#[async_trait]
impl UserDirectory for StoreDirectory {
    async fn active_users(&self) -> Result<Vec<UserId>> {
        self.users.active_users().await
    }

    async fn settings(&self, user_id: UserId) -> Result<Option<UserSettings>> {
        self.users.load_settings(user_id).await
    }
}

#[async_trait]
impl AdapterFactory for StoreDirectory {
    async fn adapters(&self, user_id: UserId) -> Result<Option<UserAdapters>> {
        let Some((lzt, g2g)) = self.users.load_credentials(user_id).await?.complete() else {
            return Ok(None);
        };

        let source = LztClient::new(self.lzt.clone(), lzt)
            .with_context(|| format!("failed to build LZT client for user {user_id}"))?;
        let sink = G2gClient::new(self.g2g.clone(), g2g)
            .with_context(|| format!("failed to build G2G client for user {user_id}"))?;

        Ok(Some(UserAdapters {
            source: Arc::new(source),
            sink: Arc::new(sink),
        }))
    }
}
