//! Mapping of LZT HTTP failures onto [`AdapterError`].

use relist_core::AdapterError;
use reqwest::StatusCode;

/// Default wait when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Converts a transport-level reqwest failure.
pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout_secs)
    } else if err.is_decode() {
        AdapterError::decode(err.to_string())
    } else {
        AdapterError::transport(err.to_string())
    }
}

/// Converts a non-success response.
///
/// LZT reports business failures as 4xx with an `errors` array; the text
/// decides between out-of-stock, insufficient funds and plain rejection.
pub fn from_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> AdapterError {
    match status.as_u16() {
        429 => AdapterError::rate_limited(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        401 | 403 => AdapterError::Authentication(summarize(body)),
        404 | 410 => AdapterError::OutOfStock,
        code if code >= 500 => AdapterError::transport(format!("HTTP {code}: {}", summarize(body))),
        _ => {
            let lower = body.to_lowercase();
            if lower.contains("insufficient") || lower.contains("not enough money") {
                AdapterError::InsufficientFunds
            } else if lower.contains("already sold")
                || lower.contains("already bought")
                || lower.contains("item is sold")
            {
                AdapterError::OutOfStock
            } else {
                AdapterError::rejected(summarize(body))
            }
        }
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
    }
    trimmed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_uses_retry_after() {
        assert_eq!(
            from_status(StatusCode::TOO_MANY_REQUESTS, Some(12), ""),
            AdapterError::rate_limited(12)
        );
        assert_eq!(
            from_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            AdapterError::rate_limited(DEFAULT_RETRY_AFTER_SECS)
        );
    }

    #[test]
    fn test_business_failures() {
        assert_eq!(
            from_status(StatusCode::BAD_REQUEST, None, r#"{"errors":["Insufficient balance"]}"#),
            AdapterError::InsufficientFunds
        );
        assert_eq!(
            from_status(StatusCode::BAD_REQUEST, None, r#"{"errors":["This item is already sold"]}"#),
            AdapterError::OutOfStock
        );
        assert_eq!(
            from_status(StatusCode::BAD_REQUEST, None, r#"{"errors":["Bad category"]}"#),
            AdapterError::rejected("Bad category")
        );
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = from_status(StatusCode::BAD_GATEWAY, None, "upstream");
        assert!(err.is_retryable());
        assert!(matches!(
            from_status(StatusCode::UNAUTHORIZED, None, "bad token"),
            AdapterError::Authentication(_)
        ));
    }
}
