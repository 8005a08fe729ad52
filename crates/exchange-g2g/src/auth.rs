//! G2G request signing.
//!
//! Every request carries four headers: `g2g-api-key`, `g2g-user-id`,
//! `g2g-timestamp` (Unix milliseconds) and `g2g-signature`, the hex
//! HMAC-SHA256 of `path + api_key + user_id + timestamp` keyed with the API
//! secret. The path excludes the query string.

use chrono::Utc;
use hmac::{Hmac, Mac};
use relist_core::{AdapterError, G2gCredentials};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "g2g-api-key";
pub const HEADER_USER_ID: &str = "g2g-user-id";
pub const HEADER_TIMESTAMP: &str = "g2g-timestamp";
pub const HEADER_SIGNATURE: &str = "g2g-signature";

/// Signed header values for one request.
#[derive(Debug, Clone)]
pub struct G2gHeaders {
    pub api_key: String,
    pub user_id: String,
    pub timestamp: String,
    pub signature: String,
}

impl G2gHeaders {
    /// Header name/value pairs in sending order.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            (HEADER_API_KEY, self.api_key.as_str()),
            (HEADER_USER_ID, self.user_id.as_str()),
            (HEADER_TIMESTAMP, self.timestamp.as_str()),
            (HEADER_SIGNATURE, self.signature.as_str()),
        ]
    }
}

/// Signs requests for one seller account.
#[derive(Debug)]
pub struct G2gSigner {
    credentials: G2gCredentials,
}

impl G2gSigner {
    #[must_use]
    pub fn new(credentials: G2gCredentials) -> Self {
        Self { credentials }
    }

    /// Seller account id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.credentials.g2g_user_id
    }

    /// Builds headers for `path` stamped with the current time.
    ///
    /// # Errors
    /// Returns `Authentication` if the secret cannot key the HMAC.
    pub fn headers(&self, path: &str) -> Result<G2gHeaders, AdapterError> {
        self.headers_at(path, Utc::now().timestamp_millis())
    }

    /// Builds headers for `path` stamped with `timestamp_ms`.
    ///
    /// # Errors
    /// Returns `Authentication` if the secret cannot key the HMAC.
    pub fn headers_at(&self, path: &str, timestamp_ms: i64) -> Result<G2gHeaders, AdapterError> {
        let path = path.split('?').next().unwrap_or(path);
        let timestamp = timestamp_ms.to_string();
        let signature = self.sign(path, &timestamp)?;

        Ok(G2gHeaders {
            api_key: self.credentials.api_key().to_string(),
            user_id: self.credentials.g2g_user_id.clone(),
            timestamp,
            signature,
        })
    }

    fn sign(&self, path: &str, timestamp: &str) -> Result<String, AdapterError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret().as_bytes())
            .map_err(|e| AdapterError::Authentication(format!("invalid G2G secret: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(self.credentials.api_key().as_bytes());
        mac.update(self.credentials.g2g_user_id.as_bytes());
        mac.update(timestamp.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> G2gSigner {
        G2gSigner::new(G2gCredentials::new("key-1", "test-secret", "seller-9"))
    }

    #[test]
    fn test_known_signature() {
        let headers = signer().headers_at("/offers", 1_700_000_000_000).unwrap();
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(
            headers.signature,
            "3be66e8e924065aa88e425e5b8ab8880d439faf81fbd304cca1ab6db6bc84fd5"
        );
        assert_eq!(headers.api_key, "key-1");
        assert_eq!(headers.user_id, "seller-9");
    }

    #[test]
    fn test_query_string_is_not_signed() {
        let plain = signer().headers_at("/offers", 1).unwrap();
        let with_query = signer().headers_at("/offers?page=2", 1).unwrap();
        assert_eq!(plain.signature, with_query.signature);
    }

    #[test]
    fn test_signature_depends_on_path() {
        let offers = signer().headers_at("/offers", 1).unwrap();
        let orders = signer().headers_at("/orders", 1).unwrap();
        assert_ne!(offers.signature, orders.signature);
        assert_eq!(offers.signature.len(), 64);
    }
}
