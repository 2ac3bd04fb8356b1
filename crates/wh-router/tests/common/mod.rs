//! Shared setup for the Postgres-backed integration tests.
//!
//! These tests need a Docker daemon. Run them with:
//!
//! ```bash
//! cargo test -p wh-router --test postgres_repo_tests -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use wh_router::config::DatabaseConfig;
use wh_router::model::{Schema, StagingFile, TableSchema};
use wh_router::repo::NewUpload;

pub const POSTGRES_TAG: &str = "16-alpine";

/// Postgres container with the router migrations applied.
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(POSTGRES_TAG)
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;
        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let database = DatabaseConfig {
            url: format!("postgresql://postgres:postgres@{}:{}/postgres", host, port),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        };
        debug!("PostgreSQL connection: {}", database.url);

        let pool = wh_router::db::connect_and_migrate(&database)
            .await
            .context("Failed to connect and migrate")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,wh_router=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn schema(tables: &[(&str, &[(&str, &str)])]) -> Schema {
    tables
        .iter()
        .map(|(table, columns)| {
            let columns: TableSchema = columns
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect();
            (table.to_string(), columns)
        })
        .collect()
}

pub fn new_upload(destination_id: &str, namespace: &str, priority: i32, first_event_hour: u32)
    -> NewUpload {
    NewUpload {
        workspace_id: "workspace-id".into(),
        namespace: namespace.into(),
        source_id: "source-id".into(),
        destination_id: destination_id.into(),
        destination_type: "POSTGRES".into(),
        priority,
        first_event_at: Some(at(first_event_hour)),
        last_event_at: Some(at(first_event_hour + 1)),
        ..NewUpload::default()
    }
}

pub fn staging_file(location: &str, total_events: i64) -> StagingFile {
    StagingFile {
        id: 0,
        upload_id: None,
        workspace_id: "workspace-id".into(),
        source_id: "source-id".into(),
        destination_id: "dest-id".into(),
        location: location.into(),
        schema: schema(&[("tracks", &[("id", "string")])]),
        total_events,
        total_bytes: 512,
        first_event_at: Some(at(1)),
        last_event_at: Some(at(2)),
        created_at: at(3),
    }
}
