//! Batch types

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery run for one delivery date
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub batch_number: i64,
    pub delivery_date: NaiveDate,
    pub status: BatchStatus,
    pub driver_id: Option<Uuid>,
    pub collection_point_id: Option<Uuid>,
    pub collection_point_address: String,
    pub estimated_duration_minutes: i32,
    pub created_at: DateTime<Utc>,
}

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
}

/// Stop status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "stop_status", rename_all = "snake_case")]
pub enum StopStatus {
    Pending,
    Loaded,
    Delivered,
}

/// One order's position within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStop {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub order_id: Uuid,
    pub sequence_number: i32,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub estimated_arrival: NaiveDateTime,
    pub status: StopStatus,
    pub box_code: String,
}

/// Which path produced a batch's stop order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Routing-service matrix (labelled "ai" on the dashboard)
    #[serde(rename = "ai")]
    RoutingService,
    GeographicFallback,
}

impl OptimizationMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            OptimizationMethod::RoutingService => "ai",
            OptimizationMethod::GeographicFallback => "geographic_fallback",
        }
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary record per batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub batch_id: Uuid,
    pub order_count: i32,
    pub collection_point_id: Option<Uuid>,
    pub collection_point_address: String,
    pub zip_codes: Vec<String>,
    pub optimization_method: OptimizationMethod,
    pub confidence: Option<f64>,
    pub rationale: String,
    pub fallback_reason: Option<String>,
}

/// Label printed on a physical box: `B{batch_number}-{sequence_number}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxCode {
    pub batch_number: i64,
    pub sequence_number: i32,
}

impl BoxCode {
    pub fn new(batch_number: i64, sequence_number: i32) -> Self {
        Self { batch_number, sequence_number }
    }
}

impl fmt::Display for BoxCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}-{}", self.batch_number, self.sequence_number)
    }
}
