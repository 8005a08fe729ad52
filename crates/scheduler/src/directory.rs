//! Where the scheduler gets its users and their marketplace clients.

use anyhow::Result;
use async_trait::async_trait;
use relist_core::{ListingSource, MarketplaceSink, UserId, UserSettings};
use std::sync::Arc;

/// Active users and their settings.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn active_users(&self) -> Result<Vec<UserId>>;

    /// `None` if the user has not configured relisting yet.
    async fn settings(&self, user_id: UserId) -> Result<Option<UserSettings>>;
}

/// Marketplace clients bound to one user's credentials.
#[derive(Clone)]
pub struct UserAdapters {
    pub source: Arc<dyn ListingSource>,
    pub sink: Arc<dyn MarketplaceSink>,
}

impl std::fmt::Debug for UserAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAdapters").finish_non_exhaustive()
    }
}

/// Builds adapters from stored credentials.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// `None` if either marketplace is missing credentials.
    async fn adapters(&self, user_id: UserId) -> Result<Option<UserAdapters>>;
}
