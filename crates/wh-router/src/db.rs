use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Creates the pool and applies the embedded migrations.
pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = create_pool(config).await?;
    crate::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| crate::RouterError::Internal(format!("failed to run migrations: {}", e)))?;
    tracing::info!("Database migrations completed");
    Ok(pool)
}
