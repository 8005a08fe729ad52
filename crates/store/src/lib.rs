//! `SQLite` persistence for the relisting engine.
//!
//! [`SqliteStore`] implements the engine's [`relist_engine::OfferStore`];
//! [`UserRepository`] holds users, settings and credentials, the latter
//! sealed with a [`CredentialCipher`].
//!
//! # Example
//!
//! ```ignore
//! let db = Database::connect("sqlite://relist.db", 5).await?;
//! let reconciler = Reconciler::new(Arc::new(db.offer_store()));
//! ```

pub mod cipher;
pub mod database;
pub mod offer_store;
pub mod user_repo;

pub use cipher::{CipherError, CredentialCipher, CREDENTIAL_KEY_ENV};
pub use database::Database;
pub use offer_store::SqliteStore;
pub use user_repo::{UserCredentials, UserRepository};
