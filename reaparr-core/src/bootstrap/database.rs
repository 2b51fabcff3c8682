use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::Result;

/// Build the shared connection pool.
pub async fn init_database(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(config.database_url())
        .await?;

    info!(
        max_connections = config.database.max_connections,
        "database pool ready"
    );
    Ok(pool)
}
