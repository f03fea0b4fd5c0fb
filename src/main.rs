use std::sync::Arc;

use anyhow::Context;
use rag_support_core::observability::init_tracing;
use rag_support_core::{Config, PostgresStore, SupportService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("failed to initialize tracing")?;

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!("Starting RAG support core");

    let store = PostgresStore::new(&config.database)
        .await
        .context("failed to connect to Postgres")?;
    store
        .initialize_schema()
        .await
        .context("failed to initialize schema")?;

    let service = SupportService::init(&config, Arc::new(store)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    service.shutdown().await?;
    Ok(())
}
