//! Configuration management

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wh_common::env;

use crate::error::{Result, RouterError};

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/warehouse";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Upload Job Constants
// ============================================================================

pub const DEFAULT_MIN_RETRY_ATTEMPTS: i64 = 3;

/// Retry window in minutes.
pub const DEFAULT_RETRY_TIME_WINDOW_MINS: u64 = 180;

pub const DEFAULT_MIN_UPLOAD_BACKOFF_SECS: u64 = 60;

pub const DEFAULT_MAX_UPLOAD_BACKOFF_SECS: u64 = 1800;

/// Threshold in minutes after which a running upload is reported as long running.
pub const DEFAULT_LONG_RUNNING_UPLOAD_THRESHOLD_MINS: u64 = 120;

pub const DEFAULT_COLUMNS_BATCH_SIZE: usize = 100;

pub const DEFAULT_MAX_PARALLEL_TABLE_LOADS: usize = 3;

/// Warehouse schema cache TTL in minutes.
pub const DEFAULT_SCHEMA_TTL_MINS: u64 = 720;

// ============================================================================
// Object Storage Cleanup Constants
// ============================================================================

pub const DEFAULT_MAX_CONCURRENT_OBJ_DELETE_REQUESTS: usize = 10;

pub const DEFAULT_OBJ_DELETE_BATCH_SIZE: usize = 1000;

// ============================================================================
// Router Loop Constants
// ============================================================================

pub const DEFAULT_ROUTER_POLL_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_ROUTER_MAX_CONCURRENT_JOBS: usize = 8;

pub const DEFAULT_ALERTA_URL: &str = "https://alerta.rudderstack.com/api/";

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub upload_job: UploadJobConfig,
    pub object_delete: ObjectDeleteConfig,
    pub router: RouterLoopConfig,
    pub alerta_url: String,
    pub rudder_storage: Option<RudderStorageConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Knobs consumed by every upload job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJobConfig {
    pub min_retry_attempts: i64,
    pub retry_time_window: Duration,
    pub min_upload_backoff: Duration,
    pub max_upload_backoff: Duration,
    pub long_running_upload_threshold: Duration,
    pub skip_previously_failed_tables: bool,
    pub disable_alter: bool,
    pub always_regenerate_all_load_files: bool,
    pub columns_batch_size: usize,
    pub max_parallel_table_loads: usize,
    pub reporting_enabled: bool,
    pub schema_ttl: Duration,
}

impl Default for UploadJobConfig {
    fn default() -> Self {
        Self {
            min_retry_attempts: DEFAULT_MIN_RETRY_ATTEMPTS,
            retry_time_window: Duration::from_secs(DEFAULT_RETRY_TIME_WINDOW_MINS * 60),
            min_upload_backoff: Duration::from_secs(DEFAULT_MIN_UPLOAD_BACKOFF_SECS),
            max_upload_backoff: Duration::from_secs(DEFAULT_MAX_UPLOAD_BACKOFF_SECS),
            long_running_upload_threshold: Duration::from_secs(
                DEFAULT_LONG_RUNNING_UPLOAD_THRESHOLD_MINS * 60,
            ),
            skip_previously_failed_tables: false,
            disable_alter: false,
            always_regenerate_all_load_files: true,
            columns_batch_size: DEFAULT_COLUMNS_BATCH_SIZE,
            max_parallel_table_loads: DEFAULT_MAX_PARALLEL_TABLE_LOADS,
            reporting_enabled: true,
            schema_ttl: Duration::from_secs(DEFAULT_SCHEMA_TTL_MINS * 60),
        }
    }
}

/// Per-workspace override for chunked deletes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeleteOverride {
    pub concurrency: Option<usize>,
    pub batch_size: Option<usize>,
}

/// Chunked deletion settings, used by providers without batch delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDeleteConfig {
    pub max_concurrent_requests: usize,
    pub batch_size: usize,
    pub workspace_overrides: HashMap<String, ObjectDeleteOverride>,
}

impl Default for ObjectDeleteConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_OBJ_DELETE_REQUESTS,
            batch_size: DEFAULT_OBJ_DELETE_BATCH_SIZE,
            workspace_overrides: HashMap::new(),
        }
    }
}

impl ObjectDeleteConfig {
    pub fn concurrency_for(&self, workspace_id: &str) -> usize {
        self.workspace_overrides
            .get(workspace_id)
            .and_then(|o| o.concurrency)
            .unwrap_or(self.max_concurrent_requests)
            .max(1)
    }

    pub fn batch_size_for(&self, workspace_id: &str) -> usize {
        self.workspace_overrides
            .get(workspace_id)
            .and_then(|o| o.batch_size)
            .unwrap_or(self.batch_size)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterLoopConfig {
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for RouterLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_ROUTER_POLL_INTERVAL_SECS),
            max_concurrent_jobs: DEFAULT_ROUTER_MAX_CONCURRENT_JOBS,
        }
    }
}

/// Credentials for the platform owned bucket used by rudder-storage uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RudderStorageConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

fn secs(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env::var_or(key, default)?))
}

fn mins(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env::var_or(key, default)? * 60))
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let workspace_overrides = match env::var_opt("WH_OBJ_DELETE_WORKSPACE_OVERRIDES") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                RouterError::Config(format!("WH_OBJ_DELETE_WORKSPACE_OVERRIDES: {}", e))
            })?,
            None => HashMap::new(),
        };

        let rudder_storage = env::var_opt("RUDDER_STORAGE_BUCKET").map(|bucket| {
            RudderStorageConfig {
                bucket,
                region: env::var_opt("RUDDER_STORAGE_REGION")
                    .unwrap_or_else(|| "us-east-1".to_string()),
                access_key: env::var_opt("RUDDER_STORAGE_ACCESS_KEY"),
                secret_key: env::var_opt("RUDDER_STORAGE_SECRET_KEY"),
            }
        });

        let config = Config {
            database: DatabaseConfig {
                url: env::var_opt("DATABASE_URL")
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env::var_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env::var_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env::var_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env::var_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
            upload_job: UploadJobConfig {
                min_retry_attempts: env::var_or("WH_MIN_RETRY_ATTEMPTS", DEFAULT_MIN_RETRY_ATTEMPTS)?,
                retry_time_window: mins(
                    "WH_RETRY_TIME_WINDOW_MINS",
                    DEFAULT_RETRY_TIME_WINDOW_MINS,
                )?,
                min_upload_backoff: secs(
                    "WH_MIN_UPLOAD_BACKOFF_SECS",
                    DEFAULT_MIN_UPLOAD_BACKOFF_SECS,
                )?,
                max_upload_backoff: secs(
                    "WH_MAX_UPLOAD_BACKOFF_SECS",
                    DEFAULT_MAX_UPLOAD_BACKOFF_SECS,
                )?,
                long_running_upload_threshold: mins(
                    "WH_LONG_RUNNING_UPLOAD_THRESHOLD_MINS",
                    DEFAULT_LONG_RUNNING_UPLOAD_THRESHOLD_MINS,
                )?,
                skip_previously_failed_tables: env::var_or(
                    "WH_SKIP_PREVIOUSLY_FAILED_TABLES",
                    false,
                )?,
                disable_alter: env::var_or("WH_DISABLE_ALTER", false)?,
                always_regenerate_all_load_files: env::var_or(
                    "WH_ALWAYS_REGENERATE_ALL_LOAD_FILES",
                    true,
                )?,
                columns_batch_size: env::var_or(
                    "WH_COLUMNS_BATCH_SIZE",
                    DEFAULT_COLUMNS_BATCH_SIZE,
                )?,
                max_parallel_table_loads: env::var_or(
                    "WH_MAX_PARALLEL_TABLE_LOADS",
                    DEFAULT_MAX_PARALLEL_TABLE_LOADS,
                )?,
                reporting_enabled: env::var_or("REPORTING_ENABLED", true)?,
                schema_ttl: mins("WH_SCHEMA_TTL_MINS", DEFAULT_SCHEMA_TTL_MINS)?,
            },
            object_delete: ObjectDeleteConfig {
                max_concurrent_requests: env::var_or(
                    "WH_MAX_CONCURRENT_OBJ_DELETE_REQUESTS",
                    DEFAULT_MAX_CONCURRENT_OBJ_DELETE_REQUESTS,
                )?,
                batch_size: env::var_or("WH_OBJ_DELETE_BATCH_SIZE", DEFAULT_OBJ_DELETE_BATCH_SIZE)?,
                workspace_overrides,
            },
            router: RouterLoopConfig {
                poll_interval: secs("WH_ROUTER_POLL_INTERVAL_SECS", DEFAULT_ROUTER_POLL_INTERVAL_SECS)?,
                max_concurrent_jobs: env::var_or(
                    "WH_ROUTER_MAX_CONCURRENT_JOBS",
                    DEFAULT_ROUTER_MAX_CONCURRENT_JOBS,
                )?,
            },
            alerta_url: env::var_opt("ALERTA_URL").unwrap_or_else(|| DEFAULT_ALERTA_URL.to_string()),
            rudder_storage,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(RouterError::Config("Database URL cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(RouterError::Config(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(RouterError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        let job = &self.upload_job;
        if job.min_upload_backoff > job.max_upload_backoff {
            return Err(RouterError::Config(format!(
                "min upload backoff ({:?}) cannot exceed max upload backoff ({:?})",
                job.min_upload_backoff, job.max_upload_backoff
            )));
        }

        if job.columns_batch_size == 0 || job.max_parallel_table_loads == 0 {
            return Err(RouterError::Config(
                "columns batch size and max parallel table loads must be greater than 0".into(),
            ));
        }

        if self.object_delete.max_concurrent_requests == 0 || self.object_delete.batch_size == 0 {
            return Err(RouterError::Config(
                "object delete concurrency and batch size must be greater than 0".into(),
            ));
        }

        if self.router.max_concurrent_jobs == 0 {
            return Err(RouterError::Config(
                "router max concurrent jobs must be greater than 0".into(),
            ));
        }

        if !job.reporting_enabled {
            tracing::warn!("Reporting is disabled - upload metrics will not be persisted");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            upload_job: UploadJobConfig::default(),
            object_delete: ObjectDeleteConfig::default(),
            router: RouterLoopConfig::default(),
            alerta_url: DEFAULT_ALERTA_URL.to_string(),
            rudder_storage: None,
        }
    }
}
