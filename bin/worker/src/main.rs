//! Job-queue worker for waypoint workflows.
//!
//! Polls PostgreSQL for queued executions and for suspended executions
//! whose delay has elapsed, and drives them through the engine.

mod action;
mod config;
mod db;

use action::DispatchActionExecutor;
use config::WorkerConfig;
use db::PgStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_scheduler::ExecutionRunner;
use waypoint_workflow::{Engine, ExecutorRegistry, NodeType};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WorkerConfig::from_env()?;
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let registry =
        ExecutorRegistry::with_builtins().with(NodeType::Action, DispatchActionExecutor);
    let runner = ExecutionRunner::new(Arc::new(PgStore::new(db_pool)), Engine::new(registry))
        .with_lease(chrono::Duration::seconds(config.poll.lease_seconds))
        .with_batch_size(config.poll.batch_size);

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.poll.interval_seconds));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        interval_seconds = config.poll.interval_seconds,
        batch_size = config.poll.batch_size,
        "Polling for executions"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => poll(&runner).await,
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn poll(runner: &ExecutionRunner<PgStore>) {
    let now = chrono::Utc::now();
    if let Err(e) = runner.process_pending(now).await {
        tracing::warn!(error = %e, "Failed to process pending executions");
    }
    if let Err(e) = runner.process_due(now).await {
        tracing::warn!(error = %e, "Failed to process due executions");
    }
}
