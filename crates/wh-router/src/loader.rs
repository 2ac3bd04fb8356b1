//! Contracts between the upload job and its external collaborators.
//!
//! A [`WarehouseLoader`] talks to one destination. It receives an
//! [`Uploader`] at setup so it can read the upload's schema and load files
//! without depending on job internals. Load file generation and destination
//! credential validation live behind their own traits.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::model::{LoadFile, LoadFileRange, Schema, StagingFile, TableSchema, Upload, Warehouse};

/// Coarse classification of a job failure, used for stats and the persisted
/// `error_category` column. It never changes control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorType {
    Uncategorized,
    Permission,
    ResourceNotFound,
    ConcurrentQuery,
    ColumnCount,
    ColumnSize,
    InsufficientResource,
    AlterColumn,
}

impl JobErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorType::Uncategorized => "uncategorized",
            JobErrorType::Permission => "permission_error",
            JobErrorType::ResourceNotFound => "resource_not_found_error",
            JobErrorType::ConcurrentQuery => "concurrent_query_error",
            JobErrorType::ColumnCount => "column_count_error",
            JobErrorType::ColumnSize => "column_size_error",
            JobErrorType::InsufficientResource => "insufficient_resource_error",
            JobErrorType::AlterColumn => "alter_column_error",
        }
    }

    /// User-facing category stored with the upload.
    pub fn category(&self) -> &'static str {
        match self {
            JobErrorType::Permission | JobErrorType::ResourceNotFound => "Permission Error",
            JobErrorType::ColumnCount | JobErrorType::ColumnSize | JobErrorType::AlterColumn => {
                "Schema Error"
            },
            JobErrorType::InsufficientResource => "Resource Error",
            JobErrorType::ConcurrentQuery | JobErrorType::Uncategorized => "Default",
        }
    }
}

impl std::fmt::Display for JobErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEFAULT_RULES: &[(JobErrorType, &str)] = &[
    (
        JobErrorType::Permission,
        r"(?i)permission denied|access denied|insufficient privileges?|not authori[sz]ed",
    ),
    (
        JobErrorType::ConcurrentQuery,
        r"(?i)concurrent (update|transaction)|could not serialize access|deadlock detected",
    ),
    (
        JobErrorType::ColumnCount,
        r"(?i)too many columns|tables can have at most \d+ columns",
    ),
    (
        JobErrorType::ColumnSize,
        r"(?i)value too long|exceeds the maximum (size|length)",
    ),
    (
        JobErrorType::InsufficientResource,
        r"(?i)out of memory|disk full|quota exceeded|insufficient resources",
    ),
    (
        JobErrorType::AlterColumn,
        r"(?i)cannot alter|cannot change (column )?type",
    ),
    (
        JobErrorType::ResourceNotFound,
        r"(?i)does not exist|not found|no such (bucket|table|schema)",
    ),
];

static DEFAULT_MAPPER: LazyLock<ErrorMapper> =
    LazyLock::new(|| ErrorMapper::new(DEFAULT_RULES).unwrap_or_default());

/// Ordered regex rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct ErrorMapper {
    rules: Vec<(JobErrorType, Regex)>,
}

impl ErrorMapper {
    pub fn new(rules: &[(JobErrorType, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(kind, pattern)| Regex::new(pattern).map(|re| (*kind, re)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn default_mapper() -> &'static ErrorMapper {
        &DEFAULT_MAPPER
    }

    pub fn classify(&self, message: &str) -> JobErrorType {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(JobErrorType::Uncategorized)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadTableStats {
    pub rows_inserted: i64,
}

/// One destination's capabilities. Every method must be safe to call again
/// after a partial failure.
#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    async fn setup(&self, warehouse: &Warehouse, uploader: Arc<dyn Uploader>)
        -> anyhow::Result<()>;

    async fn create_schema(&self) -> anyhow::Result<()>;

    async fn create_table(&self, table: &str, columns: &TableSchema) -> anyhow::Result<()>;

    async fn add_columns(&self, table: &str, columns: &TableSchema) -> anyhow::Result<()>;

    async fn alter_column(&self, table: &str, column: &str, data_type: &str)
        -> anyhow::Result<()>;

    async fn load_table(&self, table: &str) -> anyhow::Result<LoadTableStats>;

    async fn fetch_schema(&self) -> anyhow::Result<Schema>;

    async fn cleanup(&self);

    fn classify_error(&self, message: &str) -> JobErrorType {
        ErrorMapper::default_mapper().classify(message)
    }
}

/// View of the running upload handed to the loader. The cached namespace
/// schema is the only thing a loader may write through it.
#[async_trait]
pub trait Uploader: Send + Sync {
    fn table_schema_in_warehouse(&self, table: &str) -> TableSchema;

    fn table_schema_in_upload(&self, table: &str) -> TableSchema;

    fn is_warehouse_schema_empty(&self) -> bool;

    async fn single_load_file(&self, table: &str) -> anyhow::Result<LoadFile>;

    async fn load_files_metadata(&self, table: &str, limit: Option<i64>)
        -> anyhow::Result<Vec<LoadFile>>;

    async fn sample_load_file_location(&self, table: &str) -> anyhow::Result<String>;

    fn use_rudder_storage(&self) -> bool;

    fn should_on_dedup_use_new_record(&self) -> bool;

    fn can_append(&self) -> bool;

    fn load_file_type(&self) -> String;

    /// Schema cached for the destination namespace; empty when none is stored.
    async fn local_schema(&self) -> anyhow::Result<Schema>;

    /// Replaces the cached namespace schema, e.g. after the loader
    /// reconciled it against the warehouse.
    async fn update_local_schema(&self, schema: Schema) -> anyhow::Result<()>;
}

pub struct LoadFileRequest<'a> {
    pub upload: &'a Upload,
    pub warehouse: &'a Warehouse,
    pub staging_files: &'a [StagingFile],
    pub upload_schema: &'a Schema,
    /// Rebuild every load file instead of only the missing ones.
    pub regenerate_all: bool,
}

/// Turns staging files into per-table load files.
#[async_trait]
pub trait LoadFileGenerator: Send + Sync {
    async fn create_load_files(&self, request: LoadFileRequest<'_>)
        -> anyhow::Result<LoadFileRange>;
}

/// Checks whether a destination's credentials still work.
#[async_trait]
pub trait DestinationValidator: Send + Sync {
    async fn validate(&self, destination: &crate::model::Destination) -> anyhow::Result<bool>;
}
