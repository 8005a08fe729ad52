//! LZT wire types and their conversion into [`Listing`].

use chrono::{DateTime, TimeZone, Utc};
use relist_core::{AdapterError, Category, Listing};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;

/// `GET /market/{category}` response.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<RawItem>,
}

/// `GET /market/{item_id}` response.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemResponse {
    pub item: RawItem,
}

/// `POST /market/{item_id}/fast-buy` response.
#[derive(Debug, Deserialize)]
pub(crate) struct FastBuyResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub item: PurchasedItem,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PurchasedItem {
    #[allow(dead_code)]
    pub item_id: Value,
    #[serde(rename = "loginData", default)]
    pub login_data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginData {
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl LoginData {
    /// Credential text handed to the buyer.
    pub fn into_text(self) -> Option<String> {
        match (self.raw, self.login, self.password) {
            (Some(raw), _, _) if !raw.is_empty() => Some(raw),
            (_, Some(login), Some(password)) => Some(format!("{login}:{password}")),
            _ => None,
        }
    }
}

/// One market item. Fields the engine needs are typed; everything else is
/// kept as attributes for the offer formatters.
#[derive(Debug, Deserialize)]
pub(crate) struct RawItem {
    pub item_id: Value,
    pub price: Value,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_date: Option<i64>,
    #[serde(default)]
    pub account_last_activity: Option<i64>,
    #[serde(default)]
    pub category: Option<RawCategory>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCategory {
    #[serde(default)]
    pub category_url: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
}

/// Renders a JSON id (number or string) as text.
pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a JSON number or numeric string without going through `f64`.
pub(crate) fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(values) => {
            let parts: Vec<String> = values
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

impl RawItem {
    /// Category slug reported by the item itself, if any.
    pub fn category_slug(&self) -> Option<&str> {
        let category = self.category.as_ref()?;
        category
            .category_url
            .as_deref()
            .or(category.category_name.as_deref())
    }

    /// Converts to a listing in `category`.
    pub fn into_listing(self, category: Category) -> Result<Listing, AdapterError> {
        let source_id = id_text(&self.item_id)
            .ok_or_else(|| AdapterError::decode("item without item_id"))?;
        let price = decimal(&self.price)
            .ok_or_else(|| AdapterError::decode(format!("item {source_id} has invalid price")))?;

        let mut listing = Listing::new(source_id, category, price);
        if let Some(posted_at) = timestamp(self.published_date) {
            listing = listing.with_posted_at(posted_at);
        }
        if let Some(active_at) = timestamp(self.account_last_activity) {
            listing = listing.with_last_activity_at(active_at);
        }
        if let Some(title) = self.title.filter(|t| !t.trim().is_empty()) {
            listing = listing.with_title(title);
        }
        for (key, value) in &self.extra {
            if let Some(text) = attribute_text(value) {
                listing = listing.with_attribute(key.clone(), text);
            }
        }
        Ok(listing)
    }

    /// Converts using the category the item reports.
    pub fn into_listing_with_own_category(self) -> Result<Listing, AdapterError> {
        let slug = self
            .category_slug()
            .ok_or_else(|| AdapterError::decode("item without category"))?;
        let category = Category::from_str(&slug.to_lowercase())
            .map_err(|e| AdapterError::decode(e.to_string()))?;
        self.into_listing(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw(value: Value) -> RawItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_item_converts_to_listing() {
        let item = raw(json!({
            "item_id": 123456,
            "price": 19.99,
            "title": "Steam 50 games",
            "published_date": 1_700_000_000,
            "account_last_activity": 1_690_000_000,
            "steam_level": 15,
            "steam_game_count": "50",
            "steam_games": ["CS2", "Rust"],
            "nested": { "ignored": true }
        }));

        let listing = item.into_listing(Category::Steam).unwrap();
        assert_eq!(listing.source_id, "123456");
        assert_eq!(listing.source_price, dec!(19.99));
        assert_eq!(listing.title.as_deref(), Some("Steam 50 games"));
        assert_eq!(listing.posted_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(listing.attribute("steam_level"), Some("15"));
        assert_eq!(listing.attribute("steam_game_count"), Some("50"));
        assert_eq!(listing.attribute("steam_games"), Some("CS2, Rust"));
        assert_eq!(listing.attribute("nested"), None);
    }

    #[test]
    fn test_missing_timestamps_stay_missing() {
        let item = raw(json!({ "item_id": "A1", "price": "5", "account_last_activity": 0 }));
        let listing = item.into_listing(Category::Valorant).unwrap();
        assert!(listing.posted_at.is_none());
        assert!(listing.last_activity_at.is_none());
    }

    #[test]
    fn test_invalid_price_is_decode_error() {
        let item = raw(json!({ "item_id": 1, "price": "free" }));
        assert!(matches!(
            item.into_listing(Category::Steam),
            Err(AdapterError::Decode(_))
        ));
    }

    #[test]
    fn test_own_category() {
        let item = raw(json!({
            "item_id": 7,
            "price": 3,
            "category": { "category_url": "valorant" }
        }));
        let listing = item.into_listing_with_own_category().unwrap();
        assert_eq!(listing.category, Category::Valorant);
    }

    #[test]
    fn test_login_data_prefers_raw() {
        let data = LoginData {
            raw: Some("user:pass:mail".to_string()),
            login: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert_eq!(data.into_text().as_deref(), Some("user:pass:mail"));

        let data = LoginData {
            raw: None,
            login: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert_eq!(data.into_text().as_deref(), Some("user:pass"));
    }
}
