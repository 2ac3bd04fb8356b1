//! Repository contracts consumed by the upload job.
//!
//! Every method is a future: dropping it (job cancellation) abandons the
//! in-flight query. The Postgres implementations live in [`postgres`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    EventTimeRange, LoadFile, PendingTableUpload, Schema, StagingFile, TableUpload,
    TableUploadUpdate, Timings, Upload, UploadErrors, UploadMetadata, WhSchema,
};
use crate::reporting::ReportedMetric;
use crate::state::UploadState;

pub mod postgres;

/// One column assignment of an upload row update.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadField {
    Status(UploadState),
    Timings(Timings),
    Metadata(UploadMetadata),
    Error(UploadErrors),
    ErrorCategory(String),
    UpdatedAt(DateTime<Utc>),
    InProgress(bool),
    LastExecAt(DateTime<Utc>),
    Schema(Schema),
    Attempts(i64),
    LoadFileStartId(i64),
    LoadFileEndId(i64),
}

impl UploadField {
    pub fn column(&self) -> &'static str {
        match self {
            UploadField::Status(_) => "status",
            UploadField::Timings(_) => "timings",
            UploadField::Metadata(_) => "metadata",
            UploadField::Error(_) => "error",
            UploadField::ErrorCategory(_) => "error_category",
            UploadField::UpdatedAt(_) => "updated_at",
            UploadField::InProgress(_) => "in_progress",
            UploadField::LastExecAt(_) => "last_exec_at",
            UploadField::Schema(_) => "upload_schema",
            UploadField::Attempts(_) => "attempts",
            UploadField::LoadFileStartId(_) => "load_file_start_id",
            UploadField::LoadFileEndId(_) => "load_file_end_id",
        }
    }
}

/// Fields of a brand new upload.
#[derive(Debug, Clone, Default)]
pub struct NewUpload {
    pub workspace_id: String,
    pub namespace: String,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: String,
    pub priority: i32,
    pub metadata: UploadMetadata,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait UploadsRepo: Send + Sync {
    async fn insert(&self, upload: &NewUpload, staging_file_ids: &[i64]) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Upload>;

    async fn update(&self, id: i64, fields: &[UploadField]) -> Result<()>;

    /// Applies `fields` and records `metrics` in a single transaction.
    async fn update_with_report(
        &self,
        id: i64,
        fields: &[UploadField],
        metrics: &[ReportedMetric],
    ) -> Result<()>;

    async fn upload_timings(&self, id: i64) -> Result<Timings>;

    /// Uploads that may run now: not terminal, not in progress and past
    /// their next retry time.
    async fn due_uploads(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Upload>>;

    /// Clears `in_progress` on every upload, or only on those of one
    /// destination type. Flags left behind by a dead process would otherwise
    /// hide their uploads from [`UploadsRepo::due_uploads`]. Returns the
    /// number of uploads reset.
    async fn reset_in_progress(&self, destination_type: Option<&str>) -> Result<u64>;
}

#[async_trait]
pub trait TableUploadsRepo: Send + Sync {
    /// Creates waiting rows for the given tables; existing rows are kept.
    async fn insert(&self, upload_id: i64, table_names: &[String]) -> Result<()>;

    async fn get_by_upload_id(&self, upload_id: i64) -> Result<Vec<TableUpload>>;

    async fn get_by_upload_id_and_table_name(
        &self,
        upload_id: i64,
        table_name: &str,
    ) -> Result<TableUpload>;

    async fn update(&self, upload_id: i64, table_name: &str, update: &TableUploadUpdate)
        -> Result<()>;

    /// Events exported so far, excluding `skip_tables`.
    async fn total_exported_events(&self, upload_id: i64, skip_tables: &[String]) -> Result<i64>;
}

#[async_trait]
pub trait StagingFilesRepo: Send + Sync {
    async fn insert(&self, file: &StagingFile) -> Result<i64>;

    async fn get_for_upload_id(&self, upload_id: i64) -> Result<Vec<StagingFile>>;

    async fn total_events_for_upload_id(&self, upload_id: i64) -> Result<i64>;

    async fn event_time_ranges_by_upload_id(&self, upload_id: i64) -> Result<Vec<EventTimeRange>>;
}

#[async_trait]
pub trait LoadFilesRepo: Send + Sync {
    async fn insert(&self, files: &[LoadFile]) -> Result<()>;

    async fn get(&self, upload_id: i64) -> Result<Vec<LoadFile>>;

    /// Load files of an upload, optionally for one table and capped at `limit`.
    async fn get_filtered(
        &self,
        upload_id: i64,
        table_name: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<LoadFile>>;

    async fn get_by_id(&self, id: i64) -> Result<LoadFile>;

    async fn delete(&self, upload_id: i64, staging_file_ids: &[i64]) -> Result<()>;

    async fn distinct_table_name(
        &self,
        source_id: &str,
        destination_id: &str,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<String>>;

    /// (table, rows) across the upload's load files.
    async fn total_rows_by_table(&self, upload_id: i64) -> Result<Vec<(String, i64)>>;
}

#[async_trait]
pub trait WhSchemaRepo: Send + Sync {
    async fn get_for_namespace(
        &self,
        destination_id: &str,
        namespace: &str,
    ) -> Result<Option<WhSchema>>;

    /// Upserts on (destination, namespace).
    async fn insert(&self, schema: &WhSchema) -> Result<i64>;

    async fn set_expiry_for_destination(
        &self,
        destination_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait PendingTableUploadsRepo: Send + Sync {
    /// Table uploads of this and earlier-ranked non-terminal uploads on the
    /// same destination namespace.
    async fn pending_table_uploads(
        &self,
        destination_id: &str,
        namespace: &str,
        priority: i32,
        first_event_at: Option<DateTime<Utc>>,
        upload_id: i64,
    ) -> Result<Vec<PendingTableUpload>>;
}

/// The repository set an upload job is wired with.
#[derive(Clone)]
pub struct Repositories {
    pub uploads: Arc<dyn UploadsRepo>,
    pub table_uploads: Arc<dyn TableUploadsRepo>,
    pub staging_files: Arc<dyn StagingFilesRepo>,
    pub load_files: Arc<dyn LoadFilesRepo>,
    pub wh_schemas: Arc<dyn WhSchemaRepo>,
    pub pending_table_uploads: Arc<dyn PendingTableUploadsRepo>,
}

impl Repositories {
    pub fn postgres(
        pool: sqlx::PgPool,
        reporting: Arc<dyn crate::reporting::Reporting>,
    ) -> Self {
        let uploads = Arc::new(postgres::PgUploads::new(pool.clone(), reporting));
        Self {
            uploads: uploads.clone(),
            table_uploads: Arc::new(postgres::PgTableUploads::new(pool.clone())),
            staging_files: Arc::new(postgres::PgStagingFiles::new(pool.clone())),
            load_files: Arc::new(postgres::PgLoadFiles::new(pool.clone())),
            wh_schemas: Arc::new(postgres::PgWhSchemas::new(pool)),
            pending_table_uploads: uploads,
        }
    }
}
