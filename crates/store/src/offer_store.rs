//! `SQLite` implementation of [`OfferStore`].
//!
//! Uniqueness rules live in the schema (see `migrations/`), so concurrent
//! processes sharing one database file still get them. Version checks are
//! `UPDATE ... WHERE version = ?` with the affected row count deciding
//! between success and [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relist_core::{
    Category, DeliveryPayload, Offer, OfferContent, OfferState, Order, OrderState, UserId,
};
use relist_engine::{Inserted, OfferStore, StateCounts, StoreError};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const OFFER_COLUMNS: &str = "offer_id, user_id, source_id, sink_offer_id, category, source_price, \
     markup_percent, title, description, destination_price, sink_category, state, \
     publish_attempts, failure_reason, version, created_at, updated_at";

const ORDER_COLUMNS: &str = "order_id, user_id, sink_order_id, offer_id, amount, state, \
     purchase_ref, delivery_attempts, failure_reason, version, created_at, updated_at";

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OfferRow {
    offer_id: String,
    user_id: i64,
    source_id: String,
    sink_offer_id: Option<String>,
    category: String,
    source_price: String,
    markup_percent: i64,
    title: Option<String>,
    description: Option<String>,
    destination_price: Option<String>,
    sink_category: Option<String>,
    state: String,
    publish_attempts: i64,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for Offer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let content = match (row.title, row.description, row.destination_price, row.sink_category) {
            (Some(title), Some(description), Some(price), Some(sink_category)) => {
                Some(OfferContent {
                    title,
                    description,
                    destination_price: parse_decimal("destination_price", &price)?,
                    sink_category,
                })
            }
            _ => None,
        };

        Ok(Offer {
            offer_id: parse_uuid("offer_id", &row.offer_id)?,
            user_id: UserId(row.user_id),
            source_id: row.source_id,
            sink_offer_id: row.sink_offer_id,
            category: Category::from_str(&row.category).map_err(|e| corrupt("category", e))?,
            source_price: parse_decimal("source_price", &row.source_price)?,
            markup_percent: u32::try_from(row.markup_percent)
                .map_err(|e| corrupt("markup_percent", e))?,
            content,
            state: OfferState::from_str(&row.state).map_err(|e| corrupt("state", e))?,
            publish_attempts: u32::try_from(row.publish_attempts)
                .map_err(|e| corrupt("publish_attempts", e))?,
            failure_reason: row.failure_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    user_id: i64,
    sink_order_id: String,
    offer_id: String,
    amount: String,
    state: String,
    purchase_ref: Option<String>,
    delivery_attempts: i64,
    failure_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            order_id: parse_uuid("order_id", &row.order_id)?,
            user_id: UserId(row.user_id),
            sink_order_id: row.sink_order_id,
            offer_id: parse_uuid("offer_id", &row.offer_id)?,
            amount: parse_decimal("amount", &row.amount)?,
            state: OrderState::from_str(&row.state).map_err(|e| corrupt("state", e))?,
            purchase_ref: row.purchase_ref,
            delivery_attempts: u32::try_from(row.delivery_attempts)
                .map_err(|e| corrupt("delivery_attempts", e))?,
            failure_reason: row.failure_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::integrity(format!("corrupt {field}: {err}"))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| corrupt(field, e))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value).map_err(|e| corrupt(field, e))
}

fn db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::integrity(db.message().to_string());
        }
    }
    StoreError::backend(err.to_string())
}

// =============================================================================
// Statements
// =============================================================================

async fn fetch_offer(conn: &mut SqliteConnection, offer_id: Uuid) -> Result<Option<Offer>, StoreError> {
    let row = sqlx::query_as::<_, OfferRow>(&format!(
        "SELECT {OFFER_COLUMNS} FROM offers WHERE offer_id = ?1"
    ))
    .bind(offer_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;
    row.map(Offer::try_from).transpose()
}

async fn fetch_order_by_sink(
    conn: &mut SqliteConnection,
    sink_order_id: &str,
) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE sink_order_id = ?1"
    ))
    .bind(sink_order_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;
    row.map(Order::try_from).transpose()
}

async fn exists(conn: &mut SqliteConnection, table: &str, key: &str, id: Uuid) -> Result<bool, StoreError> {
    let found = sqlx::query_scalar::<_, i64>(&format!("SELECT 1 FROM {table} WHERE {key} = ?1"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(found.is_some())
}

async fn write_offer(
    conn: &mut SqliteConnection,
    offer: &Offer,
    expected_version: i64,
) -> Result<Offer, StoreError> {
    let content = offer.content.as_ref();
    let result = sqlx::query(
        r"
        UPDATE offers SET
            sink_offer_id = ?1,
            title = ?2,
            description = ?3,
            destination_price = ?4,
            sink_category = ?5,
            state = ?6,
            publish_attempts = ?7,
            failure_reason = ?8,
            updated_at = ?9,
            source_price = ?10,
            version = version + 1
        WHERE offer_id = ?11 AND version = ?12
        ",
    )
    .bind(offer.sink_offer_id.as_deref())
    .bind(content.map(|c| c.title.as_str()))
    .bind(content.map(|c| c.description.as_str()))
    .bind(content.map(|c| c.destination_price.to_string()))
    .bind(content.map(|c| c.sink_category.as_str()))
    .bind(offer.state.as_str())
    .bind(i64::from(offer.publish_attempts))
    .bind(offer.failure_reason.as_deref())
    .bind(offer.updated_at)
    .bind(offer.source_price.to_string())
    .bind(offer.offer_id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(if exists(conn, "offers", "offer_id", offer.offer_id).await? {
            StoreError::Conflict {
                entity: "offer",
                id: offer.offer_id,
            }
        } else {
            StoreError::NotFound {
                entity: "offer",
                id: offer.offer_id,
            }
        });
    }

    let mut saved = offer.clone();
    saved.version = expected_version + 1;
    Ok(saved)
}

async fn write_order(
    conn: &mut SqliteConnection,
    order: &Order,
    expected_version: i64,
    payload: Option<&DeliveryPayload>,
) -> Result<Order, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE orders SET
            state = ?1,
            purchase_ref = ?2,
            delivery_payload = COALESCE(?3, delivery_payload),
            delivery_attempts = ?4,
            failure_reason = ?5,
            updated_at = ?6,
            version = version + 1
        WHERE order_id = ?7 AND version = ?8
        ",
    )
    .bind(order.state.as_str())
    .bind(order.purchase_ref.as_deref())
    .bind(payload.map(DeliveryPayload::expose))
    .bind(i64::from(order.delivery_attempts))
    .bind(order.failure_reason.as_deref())
    .bind(order.updated_at)
    .bind(order.order_id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(if exists(conn, "orders", "order_id", order.order_id).await? {
            StoreError::Conflict {
                entity: "order",
                id: order.order_id,
            }
        } else {
            StoreError::NotFound {
                entity: "order",
                id: order.order_id,
            }
        });
    }

    let mut saved = order.clone();
    saved.version = expected_version + 1;
    Ok(saved)
}

fn tally<S>(rows: Vec<(String, i64)>) -> Result<StateCounts<S>, StoreError>
where
    S: FromStr + std::hash::Hash + Eq,
    S::Err: std::fmt::Display,
{
    rows.into_iter()
        .map(|(state, n)| {
            let state = S::from_str(&state).map_err(|e| corrupt("state", e))?;
            Ok((state, u64::try_from(n).unwrap_or(0)))
        })
        .collect()
}

// =============================================================================
// Store
// =============================================================================

/// Offer and order persistence in `SQLite`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>, StoreError> {
        self.pool.acquire().await.map_err(db_error)
    }
}

#[async_trait]
impl OfferStore for SqliteStore {
    async fn insert_offer(&self, offer: &Offer) -> Result<Inserted<Offer>, StoreError> {
        let content = offer.content.as_ref();
        let result = sqlx::query(
            r"
            INSERT INTO offers
                (offer_id, user_id, source_id, sink_offer_id, category, source_price,
                 markup_percent, title, description, destination_price, sink_category,
                 state, publish_attempts, failure_reason, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT (user_id, source_id) DO NOTHING
            ",
        )
        .bind(offer.offer_id.to_string())
        .bind(offer.user_id.get())
        .bind(&offer.source_id)
        .bind(offer.sink_offer_id.as_deref())
        .bind(offer.category.slug())
        .bind(offer.source_price.to_string())
        .bind(i64::from(offer.markup_percent))
        .bind(content.map(|c| c.title.as_str()))
        .bind(content.map(|c| c.description.as_str()))
        .bind(content.map(|c| c.destination_price.to_string()))
        .bind(content.map(|c| c.sink_category.as_str()))
        .bind(offer.state.as_str())
        .bind(i64::from(offer.publish_attempts))
        .bind(offer.failure_reason.as_deref())
        .bind(offer.version)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(Inserted::Created(offer.clone()));
        }

        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE user_id = ?1 AND source_id = ?2"
        ))
        .bind(offer.user_id.get())
        .bind(&offer.source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(Inserted::Existing(Offer::try_from(row)?))
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_offer(&mut conn, offer_id).await
    }

    async fn offers_by_sink_id(
        &self,
        user_id: UserId,
        sink_offer_id: &str,
    ) -> Result<Vec<Offer>, StoreError> {
        sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE user_id = ?1 AND sink_offer_id = ?2"
        ))
        .bind(user_id.get())
        .bind(sink_offer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(Offer::try_from)
        .collect()
    }

    async fn offers_in_state(
        &self,
        user_id: UserId,
        state: OfferState,
    ) -> Result<Vec<Offer>, StoreError> {
        sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE user_id = ?1 AND state = ?2 \
             ORDER BY created_at ASC"
        ))
        .bind(user_id.get())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(Offer::try_from)
        .collect()
    }

    async fn count_offers(&self, user_id: UserId) -> Result<StateCounts<OfferState>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM offers WHERE user_id = ?1 GROUP BY state",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        tally(rows)
    }

    async fn update_offer(&self, offer: &Offer, expected_version: i64) -> Result<Offer, StoreError> {
        let mut conn = self.conn().await?;
        write_offer(&mut conn, offer, expected_version).await
    }

    async fn record_sale(
        &self,
        order: &Order,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<Inserted<Order>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if let Some(existing) = fetch_order_by_sink(&mut tx, &order.sink_order_id).await? {
            return Ok(Inserted::Existing(existing));
        }

        write_offer(&mut tx, offer, expected_offer_version).await?;

        sqlx::query(
            r"
            INSERT INTO orders
                (order_id, user_id, sink_order_id, offer_id, amount, state, purchase_ref,
                 delivery_attempts, failure_reason, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
        )
        .bind(order.order_id.to_string())
        .bind(order.user_id.get())
        .bind(&order.sink_order_id)
        .bind(order.offer_id.to_string())
        .bind(order.amount.to_string())
        .bind(order.state.as_str())
        .bind(order.purchase_ref.as_deref())
        .bind(i64::from(order.delivery_attempts))
        .bind(order.failure_reason.as_deref())
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Inserted::Created(order.clone()))
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1"
        ))
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(Order::try_from)
        .transpose()
    }

    async fn order_by_sink_id(&self, sink_order_id: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.conn().await?;
        fetch_order_by_sink(&mut conn, sink_order_id).await
    }

    async fn orders_in_state(
        &self,
        user_id: UserId,
        state: OrderState,
    ) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 AND state = ?2 \
             ORDER BY created_at ASC"
        ))
        .bind(user_id.get())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn count_orders(&self, user_id: UserId) -> Result<StateCounts<OrderState>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM orders WHERE user_id = ?1 GROUP BY state",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        tally(rows)
    }

    async fn update_order_and_offer(
        &self,
        order: &Order,
        expected_order_version: i64,
        offer: &Offer,
        expected_offer_version: i64,
    ) -> Result<(Order, Offer), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let saved_order = write_order(&mut tx, order, expected_order_version, None).await?;
        let saved_offer = write_offer(&mut tx, offer, expected_offer_version).await?;
        tx.commit().await.map_err(db_error)?;
        Ok((saved_order, saved_offer))
    }

    async fn store_purchase(
        &self,
        order: &Order,
        expected_version: i64,
        payload: &DeliveryPayload,
    ) -> Result<Order, StoreError> {
        let mut conn = self.conn().await?;
        write_order(&mut conn, order, expected_version, Some(payload)).await
    }

    async fn delivery_payload(&self, order_id: Uuid) -> Result<Option<DeliveryPayload>, StoreError> {
        let payload = sqlx::query_scalar::<_, Option<String>>(
            "SELECT delivery_payload FROM orders WHERE order_id = ?1",
        )
        .bind(order_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(payload.flatten().map(DeliveryPayload::new))
    }

    async fn sync_cursor(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_synced_at FROM sync_cursors WHERE user_id = ?1",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn set_sync_cursor(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO sync_cursors (user_id, last_synced_at) VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET last_synced_at = excluded.last_synced_at
            ",
        )
        .bind(user_id.get())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
