//! Batch generation and claiming handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::batching::{BatchingService, RunRequest};
use crate::types::{
    ClaimBatchRequest, ClaimBatchResponse, ErrorResponse, GenerateBatchesRequest, Request,
    SuccessResponse,
};

/// Handle delivery.batch.generate requests
pub async fn handle_generate(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<BatchingService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => {
                warn!("Batch generate request without reply subject");
                continue;
            }
        };

        let response = generate_reply(&service, &msg.payload).await?;
        if let Err(e) = client.publish(reply, response.into()).await {
            error!("Failed to publish batch generate reply: {}", e);
        }
    }

    Ok(())
}

/// Handle delivery.batch.claim requests
pub async fn handle_claim(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<BatchingService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let response = claim_reply(&service, &msg.payload).await?;
        if let Err(e) = client.publish(reply, response.into()).await {
            error!("Failed to publish batch claim reply: {}", e);
        }
    }

    Ok(())
}

/// Serialized reply for one generate request
pub(crate) async fn generate_reply(service: &BatchingService, payload: &[u8]) -> Result<Vec<u8>> {
    let request: Request<GenerateBatchesRequest> = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse batch generate request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            return Ok(serde_json::to_vec(&error)?);
        }
    };

    info!("Batch generate request {}", request.id);

    let run = RunRequest {
        delivery_date: request.payload.delivery_date,
        force_fallback: request.payload.force_fallback,
    };

    let bytes = match service.run(run).await {
        Ok(result) => serde_json::to_vec(&SuccessResponse::new(request.id, result))?,
        Err(e) => {
            error!("Batching run failed: {}", e);
            serde_json::to_vec(&ErrorResponse::new(request.id, e.code(), e.to_string()))?
        }
    };

    Ok(bytes)
}

/// Serialized reply for one claim request
pub(crate) async fn claim_reply(service: &BatchingService, payload: &[u8]) -> Result<Vec<u8>> {
    let request: Request<ClaimBatchRequest> = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse batch claim request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            return Ok(serde_json::to_vec(&error)?);
        }
    };

    let ClaimBatchRequest { batch_id, driver_id } = request.payload;

    let bytes = match service.claim_batch(batch_id, driver_id).await {
        Ok(claimed) => serde_json::to_vec(&SuccessResponse::new(
            request.id,
            ClaimBatchResponse { batch_id, claimed },
        ))?,
        Err(e) => {
            error!("Failed to claim batch {}: {}", batch_id, e);
            serde_json::to_vec(&ErrorResponse::new(request.id, e.code(), e.to_string()))?
        }
    };

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::Value;

    use crate::config::BatchingConfig;
    use crate::db::memory::MemoryBatchStore;
    use crate::services::fallback::FallbackController;
    use crate::services::geocoding::{AddressResolver, ZipTable};
    use crate::types::{CollectionPoint, Coordinates, DeliveryAddress, PendingOrder};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 23).unwrap()
    }

    fn service(orders: Vec<PendingOrder>) -> BatchingService {
        let store = Arc::new(MemoryBatchStore::new(
            orders,
            vec![CollectionPoint {
                id: Some(Uuid::new_v4()),
                name: "Intervale Farm".to_string(),
                address: "180 Intervale Rd, Burlington, VT 05401".to_string(),
                coordinates: Coordinates::new(44.4906, -73.2035),
            }],
        ));
        BatchingService::new(
            store,
            AddressResolver::new(None, ZipTable::builtin(), Duration::from_secs(1)),
            FallbackController::new(None, Duration::from_secs(1)),
            BatchingConfig::default(),
        )
    }

    fn orders(n: usize) -> Vec<PendingOrder> {
        (0..n)
            .map(|i| PendingOrder {
                id: Uuid::new_v4(),
                consumer_name: None,
                address: DeliveryAddress {
                    street: Some(format!("{} College St", 10 + i)),
                    city: Some("Burlington".to_string()),
                    state: Some("VT".to_string()),
                    zip: Some("05401".to_string()),
                    lat: Some(44.476 + i as f64 * 0.002),
                    lng: Some(-73.211),
                },
                total_amount: 30.0,
                delivery_date: date(),
            })
            .collect()
    }

    fn generate_payload(force_fallback: bool) -> Vec<u8> {
        serde_json::to_vec(&Request::new(GenerateBatchesRequest {
            delivery_date: Some(date()),
            force_fallback,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_reply_success() {
        let service = service(orders(3));

        let reply: Value = serde_json::from_slice(&generate_reply(&service, &generate_payload(false)).await.unwrap()).unwrap();

        let payload = &reply["payload"];
        assert_eq!(payload["success"], true);
        assert_eq!(payload["batchesCreated"], 1);
        assert_eq!(payload["deliveryDate"], "2026-10-23");
        assert_eq!(payload["batches"][0]["optimizationMethod"], "geographic_fallback");
    }

    #[tokio::test]
    async fn test_generate_reply_no_pending_orders() {
        let service = service(vec![]);

        let reply: Value = serde_json::from_slice(&generate_reply(&service, &generate_payload(true)).await.unwrap()).unwrap();

        assert_eq!(reply["payload"]["success"], true);
        assert_eq!(reply["payload"]["batchesCreated"], 0);
        assert_eq!(reply["payload"]["code"], "NO_PENDING_ORDERS");
    }

    #[tokio::test]
    async fn test_generate_reply_invalid_request() {
        let service = service(vec![]);

        let reply: Value = serde_json::from_slice(&generate_reply(&service, b"not json").await.unwrap()).unwrap();

        assert_eq!(reply["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_claim_reply_second_claim_loses() {
        let service = service(orders(2));
        let generated: Value =
            serde_json::from_slice(&generate_reply(&service, &generate_payload(false)).await.unwrap()).unwrap();
        let batch_id: Uuid = serde_json::from_value(generated["payload"]["batches"][0]["batchId"].clone()).unwrap();

        let claim = |driver_id: Uuid| {
            serde_json::to_vec(&Request::new(ClaimBatchRequest { batch_id, driver_id })).unwrap()
        };

        let first: Value = serde_json::from_slice(&claim_reply(&service, &claim(Uuid::new_v4())).await.unwrap()).unwrap();
        let second: Value = serde_json::from_slice(&claim_reply(&service, &claim(Uuid::new_v4())).await.unwrap()).unwrap();

        assert_eq!(first["payload"]["claimed"], true);
        assert_eq!(second["payload"]["claimed"], false);
    }
}
