//! G2G wire types.

use chrono::{DateTime, TimeZone, Utc};
use relist_core::{AdapterError, OfferContent, RemoteOffer, SinkOfferStatus, SinkOrder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Body of `POST /offers`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateOfferRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub price: f64,
    pub stock: u32,
    pub auto_accept: bool,
    pub instant_delivery: bool,
    pub category_id: &'a str,
    pub game_id: &'a str,
}

impl<'a> CreateOfferRequest<'a> {
    pub fn from_content(content: &'a OfferContent) -> Result<Self, AdapterError> {
        let price = content.destination_price.to_f64().ok_or_else(|| {
            AdapterError::rejected(format!("price {} not representable", content.destination_price))
        })?;
        Ok(Self {
            title: &content.title,
            description: &content.description,
            price,
            stock: 1,
            auto_accept: true,
            instant_delivery: true,
            category_id: &content.sink_category,
            game_id: &content.sink_category,
        })
    }
}

/// Body of `POST /orders/{id}/delivery`.
#[derive(Debug, Serialize)]
pub(crate) struct DeliveryRequest<'a> {
    pub delivery_data: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateOfferResponse {
    pub offer_id: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OffersResponse {
    #[serde(default)]
    pub offers: Vec<RawOffer>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOffer {
    pub offer_id: Value,
    #[serde(default)]
    pub title: String,
    pub price: Value,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrdersResponse {
    #[serde(default)]
    pub orders: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOrder {
    pub order_id: Value,
    pub offer_id: Value,
    pub amount: Value,
    /// Unix milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses through the number's text so `25.5` stays exactly `25.5`.
pub(crate) fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

impl RawOffer {
    pub fn into_remote(self) -> Result<RemoteOffer, AdapterError> {
        let sink_offer_id =
            id_text(&self.offer_id).ok_or_else(|| AdapterError::decode("offer without offer_id"))?;
        let price = decimal(&self.price)
            .ok_or_else(|| AdapterError::decode(format!("offer {sink_offer_id} has invalid price")))?;
        Ok(RemoteOffer {
            sink_offer_id,
            title: self.title,
            price,
            sink_category: self.category_id.unwrap_or_default(),
        })
    }

    pub fn status(&self) -> SinkOfferStatus {
        match self.status.as_deref().map(str::to_lowercase).as_deref() {
            Some("rejected" | "suspended" | "banned") => SinkOfferStatus::Rejected {
                reason: self.reason.clone().unwrap_or_default(),
            },
            Some("deleted" | "closed" | "expired") => SinkOfferStatus::Missing,
            _ => SinkOfferStatus::Active,
        }
    }
}

impl RawOrder {
    pub fn into_sink_order(self) -> Result<SinkOrder, AdapterError> {
        let sink_order_id =
            id_text(&self.order_id).ok_or_else(|| AdapterError::decode("order without order_id"))?;
        let sink_offer_id = id_text(&self.offer_id)
            .ok_or_else(|| AdapterError::decode(format!("order {sink_order_id} without offer_id")))?;
        let amount = decimal(&self.amount)
            .ok_or_else(|| AdapterError::decode(format!("order {sink_order_id} has invalid amount")))?;
        Ok(SinkOrder {
            sink_order_id,
            sink_offer_id,
            amount,
            created_at: self
                .created_at
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

/// `created_after` query value.
pub(crate) fn millis(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_offer_request_body() {
        let content = OfferContent {
            title: "Steam account".to_string(),
            description: "Level 10".to_string(),
            destination_price: dec!(25.50),
            sink_category: "steam".to_string(),
        };
        let body = serde_json::to_value(CreateOfferRequest::from_content(&content).unwrap()).unwrap();
        assert_eq!(body["price"], json!(25.5));
        assert_eq!(body["stock"], json!(1));
        assert_eq!(body["auto_accept"], json!(true));
        assert_eq!(body["instant_delivery"], json!(true));
        assert_eq!(body["game_id"], json!("steam"));
    }

    #[test]
    fn test_raw_offer_status() {
        let raw: RawOffer = serde_json::from_value(json!({
            "offer_id": 9, "title": "t", "price": 1, "status": "Rejected", "reason": "duplicate"
        }))
        .unwrap();
        assert_eq!(
            raw.status(),
            SinkOfferStatus::Rejected { reason: "duplicate".to_string() }
        );

        let raw: RawOffer =
            serde_json::from_value(json!({ "offer_id": 9, "price": 1, "status": "live" })).unwrap();
        assert_eq!(raw.status(), SinkOfferStatus::Active);
    }

    #[test]
    fn test_raw_order_conversion() {
        let raw: RawOrder = serde_json::from_value(json!({
            "order_id": "o-1", "offer_id": 77, "amount": 25.5, "created_at": 1_700_000_000_000i64
        }))
        .unwrap();
        let order = raw.into_sink_order().unwrap();
        assert_eq!(order.sink_offer_id, "77");
        assert_eq!(order.amount, dec!(25.5));
        assert_eq!(order.created_at.unwrap().timestamp(), 1_700_000_000);
    }
}
