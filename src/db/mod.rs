//! Database module

pub mod queries;

#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::services::batch_writer::{BatchDraft, NewBatch};
use crate::types::{CollectionPoint, PendingOrder};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run embedded database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");
    let versions: Vec<i64> = migrator.iter().map(|m| m.version).collect();
    info!("Compiled migration versions: {:?}", versions);

    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

/// Storage used by a batching run and by route claiming
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Orders for `delivery_date` with no batch, not delivered or cancelled
    async fn pending_orders(&self, delivery_date: NaiveDate) -> Result<Vec<PendingOrder>>;

    /// Active collection points
    async fn collection_points(&self) -> Result<Vec<CollectionPoint>>;

    /// Write batch, stops and metadata and mark the orders batched, all or nothing
    async fn create_batch(&self, draft: &BatchDraft) -> Result<NewBatch>;

    /// Assign a driver if the batch is still pending and unclaimed
    async fn claim_batch(&self, batch_id: Uuid, driver_id: Uuid) -> Result<bool>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgBatchStore {
    pool: PgPool,
}

impl PgBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchStore for PgBatchStore {
    async fn pending_orders(&self, delivery_date: NaiveDate) -> Result<Vec<PendingOrder>> {
        queries::order::list_pending_orders(&self.pool, delivery_date).await
    }

    async fn collection_points(&self) -> Result<Vec<CollectionPoint>> {
        queries::collection_point::list_active_collection_points(&self.pool).await
    }

    async fn create_batch(&self, draft: &BatchDraft) -> Result<NewBatch> {
        queries::batch::create_batch(&self.pool, draft).await
    }

    async fn claim_batch(&self, batch_id: Uuid, driver_id: Uuid) -> Result<bool> {
        queries::batch::claim_batch(&self.pool, batch_id, driver_id).await
    }
}
