//! Farm Feed Management Platform - Reconciliation Sweep
//!
//! Re-derives every warehouse ledger row and recipe cost from the source
//! records. The sweep is idempotent, so running it repairs any cascade that
//! was interrupted mid-way; an external scheduler is expected to cron it.
//!
//! Usage: `ffm-reconcile [farm-id]` — with no argument every farm is swept.

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use farm_feed_management_backend::services::ReconciliationService;
use farm_feed_management_backend::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ffm_reconcile=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Farm Feed Management reconciliation sweep");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let service = ReconciliationService::new(db_pool);

    let farm_id: Option<Uuid> = std::env::args()
        .nth(1)
        .map(|arg| Uuid::parse_str(&arg))
        .transpose()?;

    let summary = match farm_id {
        Some(id) => service.reconcile_farm(id).await?,
        None => service.reconcile_all().await?,
    };

    tracing::info!(
        "Sweep finished: {} farms, {} materials, {} recipes",
        summary.farms,
        summary.materials,
        summary.recipes
    );

    Ok(())
}
