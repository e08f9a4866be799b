//! Ping handler for health checks

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::types::ErrorResponse;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    message: String,
    service: String,
    version: String,
    timestamp: String,
}

fn pong(request: PingRequest) -> PongResponse {
    PongResponse {
        message: request
            .message
            .map(|m| format!("Pong: {}", m))
            .unwrap_or_else(|| "Pong".to_string()),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Handle delivery.ping messages
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = msg.reply.clone() else {
            error!("Ping message without reply subject");
            continue;
        };

        // An empty body is a plain ping
        let request = if msg.payload.is_empty() {
            PingRequest::default()
        } else {
            match serde_json::from_slice::<PingRequest>(&msg.payload) {
                Ok(req) => req,
                Err(e) => {
                    let error = ErrorResponse::new(uuid::Uuid::nil(), "INVALID_REQUEST", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
            }
        };

        client.publish(reply, serde_json::to_vec(&pong(request))?.into()).await?;
        debug!("Sent pong response");
    }

    Ok(())
}
