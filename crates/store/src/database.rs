use anyhow::Result;
use relist_core::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::cipher::CredentialCipher;
use crate::offer_store::SqliteStore;
use crate::user_repo::UserRepository;

/// `SQLite` connection pool with migrations applied.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    cipher: Option<Arc<CredentialCipher>>,
}

impl Database {
    /// Opens (creating if missing) the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns error if connection or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(database_url, "database ready");

        Ok(Self { pool, cipher: None })
    }

    /// # Errors
    ///
    /// Returns error if connection or migrations fail.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(&config.url, config.max_connections).await
    }

    /// Creates an in-memory database for tests.
    ///
    /// A single connection, since every `SQLite` memory connection is its
    /// own database.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool, cipher: None })
    }

    /// Key used to seal and open stored credentials.
    #[must_use]
    pub fn with_credential_cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Offer and order repository over this pool.
    #[must_use]
    pub fn offer_store(&self) -> SqliteStore {
        SqliteStore::new(self.pool.clone())
    }

    /// User, settings and credentials repository over this pool.
    ///
    /// Credential reads and writes fail unless a cipher was configured.
    #[must_use]
    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone(), self.cipher.clone())
    }
}
