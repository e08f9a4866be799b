//! Turns a sequenced cluster into batch, stop and metadata records
//!
//! Numbering happens at write time: the store hands out the batch number
//! inside its transaction and calls `BatchDraft::materialize`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::types::{
    Batch, BatchMetadata, BatchStatus, BatchStop, BatchSummary, BoxCode, CollectionPoint,
    Coordinates, OptimizationMethod, StopStatus,
};

/// A stop with its position decided but no batch yet
#[derive(Debug, Clone)]
pub struct PlannedStop {
    pub order_id: Uuid,
    pub sequence_number: i32,
    pub address: String,
    pub coordinates: Coordinates,
    pub estimated_arrival: NaiveDateTime,
}

/// Everything needed to write one batch
#[derive(Debug, Clone)]
pub struct BatchDraft {
    pub delivery_date: NaiveDate,
    pub collection_point: CollectionPoint,
    /// In visit order
    pub stops: Vec<PlannedStop>,
    pub zip_codes: Vec<String>,
    pub optimization_method: OptimizationMethod,
    pub confidence: Option<f64>,
    pub rationale: String,
    pub fallback_reason: Option<String>,
    pub estimated_duration_minutes: i32,
}

/// Records for one batch, ready to insert
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch: Batch,
    pub stops: Vec<BatchStop>,
    pub metadata: BatchMetadata,
}

impl BatchDraft {
    pub fn order_ids(&self) -> Vec<Uuid> {
        self.stops.iter().map(|s| s.order_id).collect()
    }

    /// Build the records for `batch_number`
    pub fn materialize(&self, batch_id: Uuid, batch_number: i64, created_at: DateTime<Utc>) -> NewBatch {
        let batch = Batch {
            id: batch_id,
            batch_number,
            delivery_date: self.delivery_date,
            status: BatchStatus::Pending,
            driver_id: None,
            collection_point_id: self.collection_point.id,
            collection_point_address: self.collection_point.address.clone(),
            estimated_duration_minutes: self.estimated_duration_minutes,
            created_at,
        };

        let stops = self
            .stops
            .iter()
            .map(|stop| BatchStop {
                id: Uuid::new_v4(),
                batch_id,
                order_id: stop.order_id,
                sequence_number: stop.sequence_number,
                address: stop.address.clone(),
                lat: stop.coordinates.lat,
                lng: stop.coordinates.lng,
                estimated_arrival: stop.estimated_arrival,
                status: StopStatus::Pending,
                box_code: BoxCode::new(batch_number, stop.sequence_number).to_string(),
            })
            .collect::<Vec<_>>();

        let metadata = BatchMetadata {
            batch_id,
            order_count: stops.len() as i32,
            collection_point_id: self.collection_point.id,
            collection_point_address: self.collection_point.address.clone(),
            zip_codes: self.zip_codes.clone(),
            optimization_method: self.optimization_method,
            confidence: self.confidence,
            rationale: self.rationale.clone(),
            fallback_reason: self.fallback_reason.clone(),
        };

        NewBatch { batch, stops, metadata }
    }
}

impl NewBatch {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch.id,
            batch_number: self.batch.batch_number,
            order_count: self.stops.len(),
            collection_point_id: self.metadata.collection_point_id,
            collection_point_address: self.metadata.collection_point_address.clone(),
            zip_codes: self.metadata.zip_codes.clone(),
            optimization_method: self.metadata.optimization_method,
            confidence: self.metadata.confidence,
            rationale: self.metadata.rationale.clone(),
            fallback_reason: self.metadata.fallback_reason.clone(),
            estimated_duration_minutes: self.batch.estimated_duration_minutes,
        }
    }
}
