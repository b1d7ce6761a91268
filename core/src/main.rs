//! WareBill billing worker
//!
//! Owns the background half of the pipeline: drains the cost trigger queue
//! and keeps weekly storage snapshots caught up on an interval. Transaction
//! and invoice ingress live in the embedding application, which builds the
//! same services from the library crate.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warebill_core::audit::{AuditSink, TracingAuditSink};
use warebill_core::clock::SystemClock;
use warebill_core::config::Config;
use warebill_core::services::costs::{CostCalculationService, TransactionCostHandler};
use warebill_core::services::rates::RateService;
use warebill_core::services::storage::StorageCostService;
use warebill_core::services::trigger::{cost_trigger_queue, TriggerSettings};

/// Identity stamped on rows the scheduler writes
const SYSTEM_USER: &str = "system";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warebill_core=debug,warebill_worker=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting WareBill billing worker");
    tracing::info!("Environment: {}", config.environment);

    // Connect to database
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let rates = RateService::new(db_pool.clone(), Arc::clone(&audit));
    let storage = StorageCostService::new(
        db_pool.clone(),
        rates.clone(),
        Arc::clone(&audit),
        Arc::new(SystemClock),
    );
    let costs = CostCalculationService::new(db_pool.clone(), rates, Arc::clone(&audit));
    let handler = Arc::new(TransactionCostHandler::new(costs, storage.clone()));

    let (_queue, worker) = cost_trigger_queue(
        handler,
        Arc::clone(&audit),
        TriggerSettings::from(&config.trigger),
    );
    tokio::spawn(worker.run());

    // First tick fires immediately, so a restart repairs gaps right away.
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.snapshot.catchup_interval_secs));
    loop {
        ticker.tick().await;
        match storage
            .catch_up(config.snapshot.recompute_trailing_weeks, SYSTEM_USER)
            .await
        {
            Ok(runs) => {
                let entries: usize = runs.iter().map(|run| run.entries_written).sum();
                tracing::info!(weeks = runs.len(), entries, "snapshot catch-up completed");
            }
            Err(err) => {
                tracing::error!(error = %err, "snapshot catch-up failed");
            }
        }
    }
}
