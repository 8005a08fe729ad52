//! Mapping of G2G HTTP failures onto [`AdapterError`].

use relist_core::AdapterError;
use reqwest::StatusCode;

/// Default wait when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout_secs)
    } else if err.is_decode() {
        AdapterError::decode(err.to_string())
    } else {
        AdapterError::transport(err.to_string())
    }
}

/// Converts a non-success response. Callers that give 404 a meaning of
/// their own check for it before calling this.
pub fn from_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> AdapterError {
    let message = summarize(body);
    match status.as_u16() {
        429 => AdapterError::rate_limited(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        401 | 403 => AdapterError::Authentication(message),
        408 => AdapterError::transport(format!("HTTP 408: {message}")),
        code if code >= 500 => AdapterError::transport(format!("HTTP {code}: {message}")),
        code => AdapterError::rejected(format!("HTTP {code}: {message}")),
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "reason"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            from_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            AdapterError::rate_limited(DEFAULT_RETRY_AFTER_SECS)
        );
        assert!(from_status(StatusCode::SERVICE_UNAVAILABLE, None, "").is_retryable());
        assert!(matches!(
            from_status(StatusCode::FORBIDDEN, None, r#"{"message":"bad signature"}"#),
            AdapterError::Authentication(m) if m == "bad signature"
        ));
        assert_eq!(
            from_status(StatusCode::UNPROCESSABLE_ENTITY, None, r#"{"error":"title too long"}"#),
            AdapterError::rejected("HTTP 422: title too long")
        );
    }
}
