//! Order database queries

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::types::{DeliveryAddress, PendingOrder};

/// Orders awaiting a batch for one delivery date, ordered by id
pub async fn list_pending_orders(pool: &PgPool, delivery_date: NaiveDate) -> Result<Vec<PendingOrder>> {
    let query = r#"
        SELECT
            id, consumer_name, street, city, state, zip, lat, lng,
            total_amount, delivery_date
        FROM orders
        WHERE delivery_date = $1
          AND batch_id IS NULL
          AND status NOT IN ('delivered', 'cancelled')
        ORDER BY id
    "#;

    let rows = sqlx::query(query)
        .bind(delivery_date)
        .fetch_all(pool)
        .await?;

    let orders = rows
        .into_iter()
        .map(|row| PendingOrder {
            id: row.get("id"),
            consumer_name: row.get("consumer_name"),
            address: DeliveryAddress {
                street: row.get("street"),
                city: row.get("city"),
                state: row.get("state"),
                zip: row.get("zip"),
                lat: row.get("lat"),
                lng: row.get("lng"),
            },
            total_amount: row.get("total_amount"),
            delivery_date: row.get("delivery_date"),
        })
        .collect();

    Ok(orders)
}
