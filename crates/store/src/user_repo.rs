//! Users, their relisting settings and marketplace credentials.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use relist_core::{
    ActivityFilter, AgeFilter, Category, G2gCredentials, LztCredentials, Tier, UserId,
    UserSettings,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::cipher::CredentialCipher;

/// Credentials a user has configured so far.
#[derive(Debug, Default)]
pub struct UserCredentials {
    pub lzt: Option<LztCredentials>,
    pub g2g: Option<G2gCredentials>,
}

impl UserCredentials {
    /// Returns both credential sets if the user can be processed.
    #[must_use]
    pub fn complete(self) -> Option<(LztCredentials, G2gCredentials)> {
        Some((self.lzt?, self.g2g?))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    tier: String,
    markup_percent: i64,
    price_min: String,
    price_max: String,
    categories: String,
    activity_filter: String,
    age_filter: String,
}

impl SettingsRow {
    fn into_settings(self, user_id: UserId) -> Result<UserSettings> {
        let categories = self
            .categories
            .split(',')
            .filter(|s| !s.is_empty())
            .map(Category::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UserSettings::new(user_id)
            .with_tier(Tier::from_str(&self.tier)?)
            .with_markup(u32::try_from(self.markup_percent)?)?
            .with_price_range(
                Decimal::from_str(&self.price_min)?,
                Decimal::from_str(&self.price_max)?,
            )?
            .with_categories(categories)
            .with_activity_filter(ActivityFilter::from_str(&self.activity_filter)?)?
            .with_age_filter(AgeFilter::from_str(&self.age_filter)?))
    }
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
    cipher: Option<Arc<CredentialCipher>>,
}

impl UserRepository {
    #[must_use]
    pub fn new(pool: SqlitePool, cipher: Option<Arc<CredentialCipher>>) -> Self {
        Self { pool, cipher }
    }

    fn cipher(&self) -> Result<&CredentialCipher> {
        self.cipher.as_deref().ok_or_else(|| {
            anyhow!(
                "credential key not configured; set {}",
                crate::cipher::CREDENTIAL_KEY_ENV
            )
        })
    }

    fn open(&self, sealed: Option<String>, column: &str) -> Result<Option<String>> {
        sealed
            .map(|value| {
                self.cipher()?
                    .open(&value)
                    .with_context(|| format!("cannot decrypt stored {column}"))
            })
            .transpose()
    }

    /// Registers a user, or updates the tier of an existing one.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    pub async fn upsert_user(&self, user_id: UserId, tier: Tier) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (user_id, tier, active, created_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(user_id) DO UPDATE SET tier = excluded.tier
            ",
        )
        .bind(user_id.get())
        .bind(tier.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the user does not exist or the update fails.
    pub async fn set_active(&self, user_id: UserId, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET active = ?1 WHERE user_id = ?2")
            .bind(active)
            .bind(user_id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("unknown user {user_id}"));
        }
        Ok(())
    }

    /// Users the scheduler should run cycles for.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn active_users(&self) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM users WHERE active = 1 ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    /// Loads settings; `None` if the user has not configured any.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored values are invalid.
    pub async fn load_settings(&self, user_id: UserId) -> Result<Option<UserSettings>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r"
            SELECT u.tier, s.markup_percent, s.price_min, s.price_max, s.categories,
                   s.activity_filter, s.age_filter
            FROM user_settings s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.user_id = ?1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            row.into_settings(user_id)
                .with_context(|| format!("invalid stored settings for user {user_id}"))
        })
        .transpose()
    }

    /// Persists settings. The user is registered with its tier if new.
    ///
    /// # Errors
    /// Returns an error if the database transaction fails.
    pub async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
        let categories = settings
            .categories()
            .iter()
            .map(|c| c.slug())
            .collect::<Vec<_>>()
            .join(",");
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO users (user_id, tier, active, created_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(user_id) DO UPDATE SET tier = excluded.tier
            ",
        )
        .bind(settings.user_id.get())
        .bind(settings.tier().as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO user_settings
                (user_id, markup_percent, price_min, price_max, categories,
                 activity_filter, age_filter, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                markup_percent = excluded.markup_percent,
                price_min = excluded.price_min,
                price_max = excluded.price_max,
                categories = excluded.categories,
                activity_filter = excluded.activity_filter,
                age_filter = excluded.age_filter,
                updated_at = excluded.updated_at
            ",
        )
        .bind(settings.user_id.get())
        .bind(i64::from(settings.markup_percent()))
        .bind(settings.price_min().to_string())
        .bind(settings.price_max().to_string())
        .bind(categories)
        .bind(settings.activity_filter().to_string())
        .bind(settings.age_filter().as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Seals the secret fields before writing them.
    ///
    /// # Errors
    /// Returns an error if no credential key is configured, the user does
    /// not exist or the write fails.
    pub async fn save_lzt_credentials(&self, user_id: UserId, credentials: &LztCredentials) -> Result<()> {
        let token = self.cipher()?.seal(credentials.token())?;
        sqlx::query(
            r"
            INSERT INTO credentials (user_id, lzt_token, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                lzt_token = excluded.lzt_token,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id.get())
        .bind(token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seals the secret fields before writing them.
    ///
    /// # Errors
    /// Returns an error if no credential key is configured, the user does
    /// not exist or the write fails.
    pub async fn save_g2g_credentials(&self, user_id: UserId, credentials: &G2gCredentials) -> Result<()> {
        let cipher = self.cipher()?;
        let api_key = cipher.seal(credentials.api_key())?;
        let secret = cipher.seal(credentials.secret())?;
        sqlx::query(
            r"
            INSERT INTO credentials (user_id, g2g_api_key, g2g_api_secret, g2g_user_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                g2g_api_key = excluded.g2g_api_key,
                g2g_api_secret = excluded.g2g_api_secret,
                g2g_user_id = excluded.g2g_user_id,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id.get())
        .bind(api_key)
        .bind(secret)
        .bind(&credentials.g2g_user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads and decrypts the user's credentials.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored value cannot be
    /// decrypted with the configured key.
    pub async fn load_credentials(&self, user_id: UserId) -> Result<UserCredentials> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>, Option<String>, Option<String>)>(
            r"
            SELECT lzt_token, g2g_api_key, g2g_api_secret, g2g_user_id
            FROM credentials WHERE user_id = ?1
            ",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let Some((lzt_token, api_key, secret, g2g_user_id)) = row else {
            return Ok(UserCredentials::default());
        };

        let lzt_token = self.open(lzt_token, "lzt_token")?;
        let api_key = self.open(api_key, "g2g_api_key")?;
        let secret = self.open(secret, "g2g_api_secret")?;

        Ok(UserCredentials {
            lzt: lzt_token.map(LztCredentials::new),
            g2g: match (api_key, secret, g2g_user_id) {
                (Some(key), Some(secret), Some(id)) => Some(G2gCredentials::new(key, secret, id)),
                _ => None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal_macros::dec;

    async fn database() -> Database {
        Database::new_in_memory()
            .await
            .unwrap()
            .with_credential_cipher(CredentialCipher::new(&[42u8; 32]).unwrap())
    }

    async fn repo() -> UserRepository {
        database().await.users()
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let repo = repo().await;
        let settings = UserSettings::new(UserId(7))
            .with_markup(35)
            .unwrap()
            .with_price_range(dec!(5), dec!(75.50))
            .unwrap()
            .with_categories([Category::Steam, Category::GenshinImpact])
            .with_activity_filter(ActivityFilter::Any)
            .unwrap()
            .with_age_filter(AgeFilter::OverMonth)
            .with_tier(Tier::Premium);

        repo.save_settings(&settings).await.unwrap();
        let loaded = repo.load_settings(UserId(7)).await.unwrap().unwrap();

        assert_eq!(loaded.markup_percent(), 35);
        assert_eq!(loaded.price_max(), dec!(75.50));
        assert_eq!(loaded.categories(), settings.categories());
        assert_eq!(loaded.activity_filter(), ActivityFilter::Any);
        assert_eq!(loaded.age_filter(), AgeFilter::OverMonth);
        assert_eq!(loaded.offer_limit(), 50);
    }

    #[tokio::test]
    async fn test_missing_settings_is_none() {
        let repo = repo().await;
        assert!(repo.load_settings(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_users() {
        let repo = repo().await;
        repo.upsert_user(UserId(1), Tier::Basic).await.unwrap();
        repo.upsert_user(UserId(2), Tier::Pro).await.unwrap();
        repo.set_active(UserId(1), false).await.unwrap();

        assert_eq!(repo.active_users().await.unwrap(), vec![UserId(2)]);
        assert!(repo.set_active(UserId(9), true).await.is_err());
    }

    #[tokio::test]
    async fn test_credentials_are_complete_only_with_both_sides() {
        let repo = repo().await;
        repo.upsert_user(UserId(3), Tier::Basic).await.unwrap();

        repo.save_lzt_credentials(UserId(3), &LztCredentials::new("lzt-token"))
            .await
            .unwrap();
        assert!(repo.load_credentials(UserId(3)).await.unwrap().complete().is_none());

        repo.save_g2g_credentials(UserId(3), &G2gCredentials::new("key", "secret", "seller-9"))
            .await
            .unwrap();
        let (lzt, g2g) = repo
            .load_credentials(UserId(3))
            .await
            .unwrap()
            .complete()
            .unwrap();
        assert_eq!(lzt.token(), "lzt-token");
        assert_eq!(g2g.secret(), "secret");
        assert_eq!(g2g.g2g_user_id, "seller-9");
    }

    // ============================================
    // Credential sealing
    // ============================================

    #[tokio::test]
    async fn test_stored_credential_columns_are_not_plaintext() {
        let db = database().await;
        let repo = db.users();
        repo.upsert_user(UserId(4), Tier::Basic).await.unwrap();
        repo.save_lzt_credentials(UserId(4), &LztCredentials::new("lzt-plain-token"))
            .await
            .unwrap();
        repo.save_g2g_credentials(UserId(4), &G2gCredentials::new("g2g-key", "g2g-secret", "seller-4"))
            .await
            .unwrap();

        let (token, key, secret, seller) =
            sqlx::query_as::<_, (String, String, String, String)>(
                "SELECT lzt_token, g2g_api_key, g2g_api_secret, g2g_user_id FROM credentials WHERE user_id = 4",
            )
            .fetch_one(db.pool())
            .await
            .unwrap();

        assert!(!token.contains("lzt-plain-token"));
        assert!(!key.contains("g2g-key"));
        assert!(!secret.contains("g2g-secret"));
        assert_eq!(seller, "seller-4");

        let (lzt, g2g) = repo.load_credentials(UserId(4)).await.unwrap().complete().unwrap();
        assert_eq!(lzt.token(), "lzt-plain-token");
        assert_eq!(g2g.api_key(), "g2g-key");
        assert_eq!(g2g.secret(), "g2g-secret");
    }

    #[tokio::test]
    async fn test_credentials_need_a_key() {
        let db = Database::new_in_memory().await.unwrap();
        let repo = db.users();
        repo.upsert_user(UserId(5), Tier::Basic).await.unwrap();

        let result = repo
            .save_lzt_credentials(UserId(5), &LztCredentials::new("token"))
            .await;
        assert!(result.is_err());
        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(stored, 0);

        // Nothing stored, nothing to decrypt.
        assert!(repo.load_credentials(UserId(5)).await.unwrap().lzt.is_none());
    }

    #[tokio::test]
    async fn test_credentials_under_another_key_are_rejected() {
        let db = database().await;
        db.users().upsert_user(UserId(6), Tier::Basic).await.unwrap();
        db.users()
            .save_lzt_credentials(UserId(6), &LztCredentials::new("token"))
            .await
            .unwrap();

        let rekeyed = db
            .clone()
            .with_credential_cipher(CredentialCipher::new(&[9u8; 32]).unwrap());
        let err = rekeyed.users().load_credentials(UserId(6)).await.unwrap_err();
        assert!(err.to_string().contains("lzt_token"));
    }
}
