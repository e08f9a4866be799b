//! Order and collection point types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Coordinates, DeliveryAddress};

/// An order awaiting assignment to a delivery batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub id: Uuid,
    pub consumer_name: Option<String>,
    pub address: DeliveryAddress,
    pub total_amount: f64,
    pub delivery_date: NaiveDate,
}

/// Pickup location (lead farmer's address) where a batch originates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPoint {
    pub id: Option<Uuid>,
    pub name: String,
    pub address: String,
    pub coordinates: Coordinates,
}
