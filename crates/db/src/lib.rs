//! Postgres persistence for the Waypoint gateway.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Hard ceiling on establishing the first connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool from a database URL.
///
/// Fails with [`sqlx::Error::PoolTimedOut`] if no connection could be
/// established within [`CONNECT_TIMEOUT`].
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let connect = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect(database_url);

    tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| sqlx::Error::PoolTimedOut)?
}

/// Run a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Retry [`health_check`] with doubling delays, up to `attempts` times.
pub async fn wait_until_healthy(pool: &DbPool, attempts: u32) -> Result<(), sqlx::Error> {
    let mut delay = Duration::from_millis(250);
    let mut attempt = 1;
    loop {
        match health_check(pool).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Database health check failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
        }
    }
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
