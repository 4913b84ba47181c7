use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::AppConfig;

const ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Connect the shared Postgres pool.
///
/// `application_name` shows up in `pg_stat_activity`, so the API and the
/// scheduler can be told apart on a shared database.
pub async fn create_pool(config: &AppConfig, application_name: &str) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)
        .context("DATABASE_URL is not a valid Postgres connection string")?
        .application_name(application_name);

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options)
        .await
        .context("Failed to connect to PostgreSQL")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        application_name,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}
