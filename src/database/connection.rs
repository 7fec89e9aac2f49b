//! PostgreSQL connection pool setup.

use crate::config::DatabaseConfig;
use crate::error::{Result, WarpathError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Open a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .connect(&config.url)
        .await
        .map_err(|e| WarpathError::DatabaseError(format!("connect: {e}")))?;

    info!(max_connections = config.max_connections, "database pool open");
    Ok(pool)
}

/// Run all pending schema migrations from the embedded `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| WarpathError::DatabaseError(format!("migrate: {e}")))?;
    info!("database migrations applied");
    Ok(())
}
