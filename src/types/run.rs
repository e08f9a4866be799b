//! Batching run result types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OptimizationMethod;

/// Informational code returned when there was nothing to batch
pub const NO_PENDING_ORDERS: &str = "NO_PENDING_ORDERS";

/// Structured response for one batching run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunResult {
    pub success: bool,
    pub delivery_date: NaiveDate,
    pub batches_created: usize,
    pub total_orders_processed: usize,
    /// Informational code (e.g. `NO_PENDING_ORDERS`), never an error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub batches: Vec<BatchSummary>,
    pub skipped: Vec<SkippedOrder>,
    pub failures: Vec<ClusterFailure>,
}

impl BatchRunResult {
    pub fn empty(delivery_date: NaiveDate) -> Self {
        Self {
            success: true,
            delivery_date,
            batches_created: 0,
            total_orders_processed: 0,
            code: None,
            batches: vec![],
            skipped: vec![],
            failures: vec![],
        }
    }
}

/// Per-batch summary shown on the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub batch_number: i64,
    pub order_count: usize,
    pub collection_point_id: Option<Uuid>,
    pub collection_point_address: String,
    pub zip_codes: Vec<String>,
    pub optimization_method: OptimizationMethod,
    pub confidence: Option<f64>,
    pub rationale: String,
    pub fallback_reason: Option<String>,
    pub estimated_duration_minutes: i32,
}

/// Order left out of clustering because its address could not be resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedOrder {
    pub order_id: Uuid,
    pub reason: String,
}

/// Cluster that could not be optimized or written; its orders stay pending
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFailure {
    pub order_ids: Vec<Uuid>,
    pub zip_codes: Vec<String>,
    pub code: String,
    pub message: String,
}
