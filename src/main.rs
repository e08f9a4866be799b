//! Delivery Batcher - groups pending orders into delivery batches
//!
//! Runs as a NATS worker or as a one-shot CLI command.

mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use db::{BatchStore, PgBatchStore};
use services::batching::{BatchingService, RunRequest};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "delivery-batcher.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout is reserved for the JSON result in `generate`
    let stdout_logs = !matches!(cli.command, Some(Command::Generate { .. }));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,delivery_batcher=debug".into()),
        ))
        .with(stdout_logs.then(|| tracing_subscriber::fmt::layer()))
        .with((!stdout_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => Ok(()),
        Command::Generate { date, force_fallback } => {
            let store: Arc<dyn BatchStore> = Arc::new(PgBatchStore::new(pool));
            let service = BatchingService::from_config(&config, store).await?;

            let result = service
                .run(RunRequest {
                    delivery_date: date,
                    force_fallback,
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Serve => {
            info!("Starting Delivery Batcher...");

            let store: Arc<dyn BatchStore> = Arc::new(PgBatchStore::new(pool));
            let service = Arc::new(BatchingService::from_config(&config, store).await?);

            // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth)
            let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
                (Ok(user), Ok(password)) if !user.is_empty() => {
                    async_nats::ConnectOptions::new()
                        .user_and_password(user, password)
                        .connect(&config.nats_url)
                        .await?
                }
                _ => async_nats::connect(&config.nats_url).await?,
            };
            info!("Connected to NATS at {}", config.nats_url);

            if let Err(e) = handlers::start_handlers(nats_client, service).await {
                error!("Handler error: {}", e);
                return Err(e);
            }

            Ok(())
        }
    }
}
