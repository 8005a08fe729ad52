//! Marketplace credentials and purchased account payloads.
//!
//! Everything secret is held in a [`SecretString`], so `Debug` output and
//! tracing fields only ever show `[REDACTED]`. Secrets are exposed at the
//! moment a request is signed or a payload is persisted.

use secrecy::{ExposeSecret, SecretString};

/// Bearer token for the LZT market API.
#[derive(Debug)]
pub struct LztCredentials {
    token: SecretString,
}

impl LztCredentials {
    /// Wraps a raw API token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    /// Returns the token for the `Authorization` header.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

/// G2G API key pair and seller id.
#[derive(Debug)]
pub struct G2gCredentials {
    api_key: SecretString,
    secret: SecretString,
    /// Seller account id on G2G (not secret).
    pub g2g_user_id: String,
}

impl G2gCredentials {
    /// Wraps a raw key, secret and seller id.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        g2g_user_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            secret: SecretString::from(secret.into()),
            g2g_user_id: g2g_user_id.into(),
        }
    }

    /// Returns the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Returns the signing secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

/// Credentials of a purchased account, handed to the buyer on delivery.
///
/// Never logged. Persisted per order so a paid-for item survives restarts.
pub struct DeliveryPayload {
    inner: SecretString,
}

impl DeliveryPayload {
    /// Wraps the raw credential text returned by the source marketplace.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(raw.into()),
        }
    }

    /// Exposes the raw text.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }
}

impl Clone for DeliveryPayload {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl std::fmt::Debug for DeliveryPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeliveryPayload([REDACTED])")
    }
}

/// Result of a successful source purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    /// Receipt handle from the source marketplace.
    pub purchase_ref: String,
    /// Account credentials to deliver.
    pub payload: DeliveryPayload,
}
