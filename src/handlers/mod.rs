//! NATS message handlers

pub mod batch;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tracing::{error, info};

use crate::services::batching::BatchingService;

pub const PING_SUBJECT: &str = "delivery.ping";
pub const GENERATE_SUBJECT: &str = "delivery.batch.generate";
pub const CLAIM_SUBJECT: &str = "delivery.batch.claim";

/// Start all message handlers; returns when one of them stops
pub async fn start_handlers(client: Client, service: Arc<BatchingService>) -> Result<()> {
    info!("Starting message handlers...");

    let ping_sub = client.subscribe(PING_SUBJECT).await?;
    let generate_sub = client.subscribe(GENERATE_SUBJECT).await?;
    let claim_sub = client.subscribe(CLAIM_SUBJECT).await?;

    info!(
        "Subscribed to {}, {}, {}",
        PING_SUBJECT, GENERATE_SUBJECT, CLAIM_SUBJECT
    );

    let client_ping = client.clone();
    let ping_handle = tokio::spawn(async move { ping::handle_ping(client_ping, ping_sub).await });

    let client_generate = client.clone();
    let service_generate = Arc::clone(&service);
    let generate_handle = tokio::spawn(async move {
        batch::handle_generate(client_generate, generate_sub, service_generate).await
    });

    let client_claim = client.clone();
    let service_claim = Arc::clone(&service);
    let claim_handle = tokio::spawn(async move {
        batch::handle_claim(client_claim, claim_sub, service_claim).await
    });

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = generate_handle => {
            error!("Batch generate handler finished: {:?}", result);
        }
        result = claim_handle => {
            error!("Batch claim handler finished: {:?}", result);
        }
    }

    Ok(())
}
