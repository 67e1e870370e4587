use std::sync::Arc;

use anyhow::Context;
use rental_core::config::Config;
use rental_core::db::{create_pool, run_migrations, PgRentalStore};
use rental_core::RentalService;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rental_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("DATABASE_URL must be set")?;

    tracing::info!("Starting rental-core...");
    tracing::info!("Connecting to database...");

    let pool = create_pool(&config).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    } else {
        tracing::info!("RUN_MIGRATIONS disabled, skipping migrations");
    }

    let service = RentalService::new(Arc::new(PgRentalStore::new(pool)));

    let violations = service.audit().await?;
    if violations.is_empty() {
        tracing::info!("Audit passed: every item agrees with its ongoing transactions");
    } else {
        tracing::warn!(
            "Audit found {} inconsistent item(s); repair them with set_item_status",
            violations.len()
        );
    }
    Ok(())
}
