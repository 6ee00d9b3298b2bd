pub mod accounts;
pub mod records;
pub mod sync;

use std::time::Duration;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool. Every concurrently synced account
/// holds a connection while it starts or finishes a run, so the worker
/// service sizes this from its concurrency limit.
pub async fn create_pool(database_url: &str, max_connections: u32) -> MarketsyncResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> MarketsyncResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| MarketsyncError::Database(format!("migration failed: {e}")))?;
    tracing::info!("database migrations applied");
    Ok(())
}
