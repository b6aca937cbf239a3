//! PostgreSQL pool for the catalog executor.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use crate::config::Config;

/// How long a request waits for a free connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

fn pool_options(max_connections: u32, acquire_timeout: Duration) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
}

/// Connect the catalog pool, failing fast if the database is unreachable.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = pool_options(config.database_max_connections, ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    info!(
        max_connections = config.database_max_connections,
        "catalog database pool ready"
    );
    Ok(pool)
}

/// Build a pool that connects on first use, giving up on a connection after
/// `acquire_timeout`.
pub fn lazy_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    pool_options(max_connections, acquire_timeout)
        .connect_lazy(database_url)
        .context("invalid DATABASE_URL")
}

/// Whether the catalog database answers a trivial query.
pub async fn check_health(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "catalog database health check failed");
            false
        }
    }
}
