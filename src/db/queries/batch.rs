//! Batch database queries

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::batch_writer::{BatchDraft, NewBatch};
use crate::types::{BatchStatus, StopStatus};

/// Write one batch in a single transaction
///
/// The batch number comes from `batch_number_seq`, so concurrent runs never
/// share a number. Orders are only marked if they are still unbatched; if
/// another run took any of them the whole write is rolled back.
pub async fn create_batch(pool: &PgPool, draft: &BatchDraft) -> Result<NewBatch> {
    let mut tx = pool.begin().await?;

    let batch_number: i64 = sqlx::query_scalar("SELECT nextval('batch_number_seq')")
        .fetch_one(&mut *tx)
        .await
        .context("Failed to allocate batch number")?;

    let new_batch = draft.materialize(Uuid::new_v4(), batch_number, Utc::now());
    let batch = &new_batch.batch;

    sqlx::query(
        r#"
        INSERT INTO batches (
            id, batch_number, delivery_date, status, driver_id,
            collection_point_id, collection_point_address,
            estimated_duration_minutes, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(batch.id)
    .bind(batch.batch_number)
    .bind(batch.delivery_date)
    .bind(batch.status)
    .bind(batch.driver_id)
    .bind(batch.collection_point_id)
    .bind(&batch.collection_point_address)
    .bind(batch.estimated_duration_minutes)
    .bind(batch.created_at)
    .execute(&mut *tx)
    .await
    .context("Failed to insert batch")?;

    for stop in &new_batch.stops {
        sqlx::query(
            r#"
            INSERT INTO batch_stops (
                id, batch_id, order_id, sequence_number, address,
                lat, lng, estimated_arrival, status, box_code
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(stop.id)
        .bind(stop.batch_id)
        .bind(stop.order_id)
        .bind(stop.sequence_number)
        .bind(&stop.address)
        .bind(stop.lat)
        .bind(stop.lng)
        .bind(stop.estimated_arrival)
        .bind(StopStatus::Pending)
        .bind(&stop.box_code)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert stop {}", stop.box_code))?;
    }

    let metadata = &new_batch.metadata;
    sqlx::query(
        r#"
        INSERT INTO batch_metadata (
            batch_id, order_count, collection_point_id, collection_point_address,
            zip_codes, optimization_method, confidence, rationale, fallback_reason
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(metadata.batch_id)
    .bind(metadata.order_count)
    .bind(metadata.collection_point_id)
    .bind(&metadata.collection_point_address)
    .bind(&metadata.zip_codes)
    .bind(metadata.optimization_method.as_str())
    .bind(metadata.confidence)
    .bind(&metadata.rationale)
    .bind(&metadata.fallback_reason)
    .execute(&mut *tx)
    .await
    .context("Failed to insert batch metadata")?;

    let order_ids = draft.order_ids();
    let marked = sqlx::query(
        "UPDATE orders SET batch_id = $1 WHERE id = ANY($2) AND batch_id IS NULL",
    )
    .bind(batch.id)
    .bind(&order_ids)
    .execute(&mut *tx)
    .await
    .context("Failed to mark orders as batched")?
    .rows_affected();

    if marked != order_ids.len() as u64 {
        warn!(
            "Batch {}: only {} of {} orders were still unbatched, rolling back",
            batch_number,
            marked,
            order_ids.len()
        );
        tx.rollback().await?;
        anyhow::bail!(
            "{} of {} orders were already batched by another run",
            order_ids.len() as u64 - marked,
            order_ids.len()
        );
    }

    tx.commit().await.context("Failed to commit batch")?;

    debug!("Batch {} written with {} stops", batch_number, new_batch.stops.len());
    Ok(new_batch)
}

/// Claim a batch for a driver
///
/// Single conditional update; returns false when the batch is not pending
/// or already has a driver.
pub async fn claim_batch(pool: &PgPool, batch_id: Uuid, driver_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET driver_id = $2, status = $3
        WHERE id = $1 AND status = $4 AND driver_id IS NULL
        "#,
    )
    .bind(batch_id)
    .bind(driver_id)
    .bind(BatchStatus::Assigned)
    .bind(BatchStatus::Pending)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
