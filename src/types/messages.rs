//! NATS message types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Payload for `delivery.batch.generate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBatchesRequest {
    /// Target delivery date (default: next delivery day)
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    /// Skip the routing service and use the geographic heuristic
    #[serde(default)]
    pub force_fallback: bool,
}

/// Payload for `delivery.batch.claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBatchRequest {
    pub batch_id: Uuid,
    pub driver_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBatchResponse {
    pub batch_id: Uuid,
    pub claimed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_accepts_empty_payload() {
        let request: Request<GenerateBatchesRequest> = serde_json::from_str(
            r#"{"id":"00000000-0000-0000-0000-000000000000","timestamp":"2026-10-19T10:00:00Z","payload":{}}"#,
        )
        .unwrap();
        assert!(request.payload.delivery_date.is_none());
        assert!(!request.payload.force_fallback);
    }

    #[test]
    fn test_generate_request_camel_case_fields() {
        let payload: GenerateBatchesRequest =
            serde_json::from_str(r#"{"deliveryDate":"2026-10-21","forceFallback":true}"#).unwrap();
        assert_eq!(payload.delivery_date, NaiveDate::from_ymd_opt(2026, 10, 21));
        assert!(payload.force_fallback);
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let error = ErrorResponse::new(Uuid::nil(), "DATABASE_ERROR", "connection refused");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"code\":\"DATABASE_ERROR\""));
        assert!(!json.contains("details"));
    }
}
