//! Drains the caseflow outbox against PostgreSQL until interrupted.

mod config;
mod telemetry;

use anyhow::{bail, Context, Result};
use caseflow::{TriggerMatcher, WorkflowEngine};
use caseflow_outbox::OutboxPoller;
use caseflow_postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    telemetry::init(config.log_json)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let store = Arc::new(PgStore::with_lease_timeout(pool, config.lease_ms));

    match store.stats().await {
        Ok(stats) => info!(
            pending = stats.pending,
            failing = stats.failing,
            dead_letter = stats.dead_letter,
            "outbox state at startup"
        ),
        Err(e) => warn!(error = %e, "failed to read outbox stats"),
    }

    let engine = WorkflowEngine::from_store(store.clone());
    let matcher = TriggerMatcher::new(store.clone(), store.clone(), engine)
        .with_tenant_scope(config.tenant_scope);
    let poller = OutboxPoller::new(store, Arc::new(matcher), config.drain);
    let mut handle = poller.start();

    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            true
        }
        () = handle.stopped() => false,
    };
    if !interrupted {
        error!("outbox poller exited unexpectedly");
        bail!("outbox poller exited unexpectedly");
    }

    info!("shutdown requested, waiting for in-flight drain");
    handle.shutdown().await;

    Ok(())
}
