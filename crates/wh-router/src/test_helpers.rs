#![allow(clippy::unwrap_used, clippy::expect_used)]
//! In-memory fakes for repositories and collaborators used by unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertSender};
use crate::config::{ObjectDeleteConfig, UploadJobConfig};
use crate::error::{Result, RouterError};
use crate::job::{Clock, JobDependencies, UploadJob, UploadJobFactory};
use crate::loader::{
    DestinationValidator, LoadFileGenerator, LoadFileRequest, LoadTableStats, Uploader,
    WarehouseLoader,
};
use crate::model::{
    Destination, EventTimeRange, LoadFile, LoadFileRange, PendingTableUpload, Schema, Source,
    StagingFile, TableSchema, TableUpload, TableUploadStatus, TableUploadUpdate, Timings, Upload,
    UploadErrors, UploadJobDescriptor, UploadMetadata, Warehouse, WhSchema,
};
use crate::reporting::ReportedMetric;
use crate::repo::{
    LoadFilesRepo, NewUpload, PendingTableUploadsRepo, Repositories, StagingFilesRepo,
    TableUploadsRepo, UploadField, UploadsRepo, WhSchemaRepo,
};
use crate::state::UploadState;
use crate::storage::s3::object_key;
use crate::storage::{FileManager, FileManagerFactory, FileManagerSettings};

pub static NOW: LazyLock<DateTime<Utc>> =
    LazyLock::new(|| Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());

/// Rows every fake table load reports.
pub const LOADED_ROWS: i64 = 7;

pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
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

pub fn upload(id: i64) -> Upload {
    Upload {
        id,
        workspace_id: "workspace-id".into(),
        namespace: "namespace".into(),
        source_id: "source-id".into(),
        destination_id: "dest-id".into(),
        destination_type: "POSTGRES".into(),
        status: UploadState::Waiting,
        upload_schema: Schema::new(),
        timings: Timings::default(),
        error: UploadErrors::default(),
        metadata: UploadMetadata {
            load_file_type: "csv".into(),
            ..UploadMetadata::default()
        },
        error_category: None,
        attempts: 0,
        retried: false,
        priority: 100,
        in_progress: false,
        first_event_at: Some(*NOW - chrono::Duration::hours(1)),
        last_event_at: Some(*NOW),
        last_exec_at: None,
        load_file_start_id: None,
        load_file_end_id: None,
        created_at: *NOW,
        updated_at: *NOW,
    }
}

pub fn warehouse(destination_type: &str) -> Warehouse {
    Warehouse {
        workspace_id: "workspace-id".into(),
        source: Source {
            id: "source-id".into(),
            name: "source".into(),
            source_type: "javascript".into(),
            category: "event-stream".into(),
            original_id: None,
        },
        destination: Destination {
            id: "dest-id".into(),
            name: "destination".into(),
            destination_type: destination_type.into(),
            config: serde_json::Map::new(),
        },
        namespace: "namespace".into(),
        identifier: format!("{}:source-id:dest-id", destination_type),
    }
}

pub fn staging_file(id: i64, upload_id: i64) -> StagingFile {
    StagingFile {
        id,
        upload_id: Some(upload_id),
        workspace_id: "workspace-id".into(),
        source_id: "source-id".into(),
        destination_id: "dest-id".into(),
        location: format!("s3://bucket/rudder-warehouse-staging-logs/source-id/{}.json.gz", id),
        schema: schema(&[
            ("tracks", &[("id", "string"), ("event", "string")]),
            ("pages", &[("id", "string"), ("url", "string")]),
        ]),
        total_events: 10,
        total_bytes: 1024,
        first_event_at: Some(*NOW - chrono::Duration::hours(1)),
        last_event_at: Some(*NOW),
        created_at: *NOW,
    }
}

// ============================================================================
// Repositories
// ============================================================================

#[derive(Default)]
pub struct MemUploads {
    rows: Mutex<BTreeMap<i64, Upload>>,
    statuses: Mutex<Vec<UploadState>>,
    writes: Mutex<Vec<Vec<&'static str>>>,
    reports: Mutex<Vec<ReportedMetric>>,
}

impl MemUploads {
    pub fn put(&self, upload: Upload) {
        self.rows.lock().unwrap().insert(upload.id, upload);
    }

    pub fn get_row(&self, id: i64) -> Upload {
        self.rows.lock().unwrap()[&id].clone()
    }

    /// Every status written, in order.
    pub fn statuses(&self) -> Vec<UploadState> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<ReportedMetric> {
        self.reports.lock().unwrap().clone()
    }

    /// Columns of every update call, one entry per write.
    pub fn writes(&self) -> Vec<Vec<&'static str>> {
        self.writes.lock().unwrap().clone()
    }

    fn apply(&self, id: i64, fields: &[UploadField]) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RouterError::NotFound(format!("upload {}", id)))?;
        self.writes
            .lock()
            .unwrap()
            .push(fields.iter().map(UploadField::column).collect());
        for field in fields.iter().cloned() {
            match field {
                UploadField::Status(s) => {
                    self.statuses.lock().unwrap().push(s);
                    row.status = s;
                },
                UploadField::Timings(t) => row.timings = t,
                UploadField::Metadata(m) => row.metadata = m,
                UploadField::Error(e) => row.error = e,
                UploadField::ErrorCategory(c) => row.error_category = Some(c),
                UploadField::UpdatedAt(t) => row.updated_at = t,
                UploadField::InProgress(b) => row.in_progress = b,
                UploadField::LastExecAt(t) => row.last_exec_at = Some(t),
                UploadField::Schema(s) => row.upload_schema = s,
                UploadField::Attempts(a) => row.attempts = a,
                UploadField::LoadFileStartId(i) => row.load_file_start_id = Some(i),
                UploadField::LoadFileEndId(i) => row.load_file_end_id = Some(i),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UploadsRepo for MemUploads {
    async fn insert(&self, new: &NewUpload, _staging_file_ids: &[i64]) -> Result<i64> {
        let id = self.rows.lock().unwrap().keys().max().copied().unwrap_or(0) + 1;
        let mut row = upload(id);
        row.workspace_id = new.workspace_id.clone();
        row.namespace = new.namespace.clone();
        row.source_id = new.source_id.clone();
        row.destination_id = new.destination_id.clone();
        row.destination_type = new.destination_type.clone();
        row.priority = new.priority;
        row.metadata = new.metadata.clone();
        self.put(row);
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Upload> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RouterError::NotFound(format!("upload {}", id)))
    }

    async fn update(&self, id: i64, fields: &[UploadField]) -> Result<()> {
        self.apply(id, fields)
    }

    async fn update_with_report(
        &self,
        id: i64,
        fields: &[UploadField],
        metrics: &[ReportedMetric],
    ) -> Result<()> {
        self.apply(id, fields)?;
        self.reports.lock().unwrap().extend_from_slice(metrics);
        Ok(())
    }

    async fn upload_timings(&self, id: i64) -> Result<Timings> {
        Ok(self.get(id).await?.timings)
    }

    async fn due_uploads(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Upload>> {
        let mut due: Vec<Upload> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|u| !u.status.is_terminal() && !u.in_progress)
            .filter(|u| u.metadata.next_retry_time.is_none_or(|t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|u| (u.priority, u.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn reset_in_progress(&self, destination_type: Option<&str>) -> Result<u64> {
        let mut reset = 0;
        for row in self.rows.lock().unwrap().values_mut() {
            if row.in_progress && destination_type.is_none_or(|t| row.destination_type == t) {
                row.in_progress = false;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[derive(Default)]
pub struct MemTableUploads {
    rows: Mutex<BTreeMap<(i64, String), TableUpload>>,
}

impl MemTableUploads {
    pub fn get_row(&self, upload_id: i64, table: &str) -> TableUpload {
        self.rows.lock().unwrap()[&(upload_id, table.to_string())].clone()
    }

    pub fn table_names(&self, upload_id: i64) -> Vec<String> {
        self.rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == upload_id)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl TableUploadsRepo for MemTableUploads {
    async fn insert(&self, upload_id: i64, table_names: &[String]) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        for table in table_names {
            let id = rows.len() as i64 + 1;
            rows.entry((upload_id, table.clone())).or_insert(TableUpload {
                id,
                upload_id,
                table_name: table.clone(),
                status: TableUploadStatus::Waiting,
                error: None,
                total_events: 0,
                location: None,
                last_exec_time: None,
                created_at: *NOW,
                updated_at: *NOW,
            });
        }
        Ok(())
    }

    async fn get_by_upload_id(&self, upload_id: i64) -> Result<Vec<TableUpload>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.upload_id == upload_id)
            .cloned()
            .collect())
    }

    async fn get_by_upload_id_and_table_name(
        &self,
        upload_id: i64,
        table_name: &str,
    ) -> Result<TableUpload> {
        self.rows
            .lock()
            .unwrap()
            .get(&(upload_id, table_name.to_string()))
            .cloned()
            .ok_or_else(|| {
                RouterError::NotFound(format!("table upload {} of upload {}", table_name, upload_id))
            })
    }

    async fn update(
        &self,
        upload_id: i64,
        table_name: &str,
        update: &TableUploadUpdate,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&(upload_id, table_name.to_string()))
            .ok_or_else(|| {
                RouterError::NotFound(format!("table upload {} of upload {}", table_name, upload_id))
            })?;
        if let Some(status) = update.status {
            row.status = status;
        }
        if let Some(error) = &update.error {
            row.error = Some(error.clone());
        }
        if let Some(total) = update.total_events {
            row.total_events = total;
        }
        if let Some(location) = &update.location {
            row.location = Some(location.clone());
        }
        if let Some(at) = update.last_exec_time {
            row.last_exec_time = Some(at);
        }
        Ok(())
    }

    async fn total_exported_events(&self, upload_id: i64, skip_tables: &[String]) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.upload_id == upload_id && t.status == TableUploadStatus::ExportedData)
            .filter(|t| !skip_tables.contains(&t.table_name))
            .map(|t| t.total_events)
            .sum())
    }
}

#[derive(Default)]
pub struct MemStagingFiles {
    files: Mutex<Vec<StagingFile>>,
}

#[async_trait]
impl StagingFilesRepo for MemStagingFiles {
    async fn insert(&self, file: &StagingFile) -> Result<i64> {
        let mut files = self.files.lock().unwrap();
        files.retain(|f| f.id != file.id);
        files.push(file.clone());
        Ok(file.id)
    }

    async fn get_for_upload_id(&self, upload_id: i64) -> Result<Vec<StagingFile>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.upload_id == Some(upload_id))
            .cloned()
            .collect())
    }

    async fn total_events_for_upload_id(&self, upload_id: i64) -> Result<i64> {
        Ok(self
            .get_for_upload_id(upload_id)
            .await?
            .iter()
            .map(|f| f.total_events)
            .sum())
    }

    async fn event_time_ranges_by_upload_id(&self, upload_id: i64) -> Result<Vec<EventTimeRange>> {
        Ok(self
            .get_for_upload_id(upload_id)
            .await?
            .iter()
            .filter_map(|f| {
                Some(EventTimeRange {
                    first_event_at: f.first_event_at?,
                    last_event_at: f.last_event_at?,
                })
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemLoadFiles {
    files: Mutex<Vec<LoadFile>>,
    next_id: AtomicUsize,
}

impl MemLoadFiles {
    pub fn all(&self) -> Vec<LoadFile> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoadFilesRepo for MemLoadFiles {
    async fn insert(&self, files: &[LoadFile]) -> Result<()> {
        let mut stored = self.files.lock().unwrap();
        for file in files {
            let mut file = file.clone();
            file.id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            stored.push(file);
        }
        Ok(())
    }

    async fn get(&self, upload_id: i64) -> Result<Vec<LoadFile>> {
        self.get_filtered(upload_id, None, None).await
    }

    async fn get_filtered(
        &self,
        upload_id: i64,
        table_name: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<LoadFile>> {
        let mut files: Vec<LoadFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.upload_id == upload_id)
            .filter(|f| table_name.is_none_or(|t| f.table_name == t))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            files.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(files)
    }

    async fn get_by_id(&self, id: i64) -> Result<LoadFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| RouterError::NotFound(format!("load file {}", id)))
    }

    async fn delete(&self, upload_id: i64, staging_file_ids: &[i64]) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .retain(|f| f.upload_id != upload_id && !staging_file_ids.contains(&f.staging_file_id));
        Ok(())
    }

    async fn distinct_table_name(
        &self,
        source_id: &str,
        destination_id: &str,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.source_id == source_id && f.destination_id == destination_id)
            .filter(|f| f.id >= start_id && f.id <= end_id)
            .map(|f| f.table_name.clone())
            .collect();
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    async fn total_rows_by_table(&self, upload_id: i64) -> Result<Vec<(String, i64)>> {
        let mut totals: BTreeMap<String, i64> = BTreeMap::new();
        for file in self.files.lock().unwrap().iter().filter(|f| f.upload_id == upload_id) {
            *totals.entry(file.table_name.clone()).or_default() += file.total_rows;
        }
        Ok(totals.into_iter().collect())
    }
}

#[derive(Default)]
pub struct MemWhSchemas {
    rows: Mutex<Vec<WhSchema>>,
}

impl MemWhSchemas {
    pub fn stored(&self, destination_id: &str, namespace: &str) -> Option<WhSchema> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.destination_id == destination_id && s.namespace == namespace)
            .cloned()
    }

    /// Seeds a cache entry that has not expired yet.
    pub fn seed(&self, schema: Schema) {
        self.rows.lock().unwrap().push(WhSchema {
            id: 1,
            source_id: "source-id".into(),
            destination_id: "dest-id".into(),
            namespace: "namespace".into(),
            schema,
            created_at: *NOW,
            updated_at: *NOW,
            expires_at: *NOW + chrono::Duration::hours(1),
        });
    }
}

#[async_trait]
impl WhSchemaRepo for MemWhSchemas {
    async fn get_for_namespace(
        &self,
        destination_id: &str,
        namespace: &str,
    ) -> Result<Option<WhSchema>> {
        Ok(self.stored(destination_id, namespace))
    }

    async fn insert(&self, schema: &WhSchema) -> Result<i64> {
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|s| s.destination_id == schema.destination_id && s.namespace == schema.namespace);
        match existing {
            Some(row) => {
                row.schema = schema.schema.clone();
                row.updated_at = schema.updated_at;
                row.expires_at = schema.expires_at;
                Ok(row.id)
            },
            None => {
                let id = rows.len() as i64 + 1;
                rows.push(WhSchema {
                    id,
                    ..schema.clone()
                });
                Ok(id)
            },
        }
    }

    async fn set_expiry_for_destination(
        &self,
        destination_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        for row in self
            .rows
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|s| s.destination_id == destination_id)
        {
            row.expires_at = expires_at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePendingTableUploads {
    rows: Mutex<Vec<PendingTableUpload>>,
    error: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakePendingTableUploads {
    pub fn set_rows(&self, rows: Vec<PendingTableUpload>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn fail_with(&self, message: &str) {
        *self.error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PendingTableUploadsRepo for FakePendingTableUploads {
    async fn pending_table_uploads(
        &self,
        _destination_id: &str,
        _namespace: &str,
        _priority: i32,
        _first_event_at: Option<DateTime<Utc>>,
        _upload_id: i64,
    ) -> Result<Vec<PendingTableUpload>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(RouterError::Internal(message));
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

pub fn pending_table_upload(
    upload_id: i64,
    table: &str,
    status: TableUploadStatus,
    error: Option<&str>,
) -> PendingTableUpload {
    PendingTableUpload {
        upload_id,
        destination_id: "dest-id".into(),
        namespace: "namespace".into(),
        table_name: table.into(),
        status,
        error: error.map(str::to_string),
    }
}

// ============================================================================
// Warehouse loader
// ============================================================================

#[derive(Default)]
struct LoaderState {
    schemas: VecDeque<Schema>,
    live: Schema,
    fetch_schema_calls: usize,
    calls: Vec<String>,
    load_errors: HashMap<String, String>,
    alter_error: Option<String>,
    setup_error: Option<String>,
    fetch_error: Option<String>,
    block_loads: bool,
    panic_on_setup: bool,
    uploader: Option<Arc<dyn Uploader>>,
}

/// Warehouse stand-in. Queued schemas are returned by `fetch_schema` first,
/// then the live schema built up by create/add/alter calls.
#[derive(Default)]
pub struct FakeLoader {
    state: Mutex<LoaderState>,
}

impl FakeLoader {
    pub fn push_schema(&self, schema: Schema) {
        self.state.lock().unwrap().schemas.push_back(schema);
    }

    pub fn fetch_schema_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_schema_calls
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn loaded_tables(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("load_table:").map(str::to_string))
            .collect()
    }

    pub fn fail_load(&self, table: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .load_errors
            .insert(table.to_string(), message.to_string());
    }

    pub fn fail_alter(&self, message: &str) {
        self.state.lock().unwrap().alter_error = Some(message.to_string());
    }

    pub fn fail_setup(&self, message: &str) {
        self.state.lock().unwrap().setup_error = Some(message.to_string());
    }

    pub fn fail_fetch_schema(&self, message: &str) {
        self.state.lock().unwrap().fetch_error = Some(message.to_string());
    }

    pub fn block_loads(&self) {
        self.state.lock().unwrap().block_loads = true;
    }

    pub fn panic_on_setup(&self) {
        self.state.lock().unwrap().panic_on_setup = true;
    }

    pub fn uploader(&self) -> Arc<dyn Uploader> {
        self.state.lock().unwrap().uploader.clone().unwrap()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl WarehouseLoader for FakeLoader {
    async fn setup(&self, _warehouse: &Warehouse, uploader: Arc<dyn Uploader>) -> anyhow::Result<()> {
        self.record("setup".into());
        // decided before locking so the panic leaves the mutex usable
        let panics = self.state.lock().unwrap().panic_on_setup;
        if panics {
            panic!("warehouse loader setup panicked");
        }
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.setup_error.clone() {
            bail!(message);
        }
        state.uploader = Some(uploader);
        Ok(())
    }

    async fn create_schema(&self) -> anyhow::Result<()> {
        self.record("create_schema".into());
        Ok(())
    }

    async fn create_table(&self, table: &str, columns: &TableSchema) -> anyhow::Result<()> {
        self.record(format!("create_table:{}", table));
        self.state
            .lock()
            .unwrap()
            .live
            .insert(table.to_string(), columns.clone());
        Ok(())
    }

    async fn add_columns(&self, table: &str, columns: &TableSchema) -> anyhow::Result<()> {
        self.record(format!("add_columns:{}:{}", table, columns.len()));
        self.state
            .lock()
            .unwrap()
            .live
            .entry(table.to_string())
            .or_default()
            .extend(columns.clone());
        Ok(())
    }

    async fn alter_column(&self, table: &str, column: &str, data_type: &str) -> anyhow::Result<()> {
        self.record(format!("alter_column:{}:{}", table, column));
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.alter_error.clone() {
            bail!(message);
        }
        state
            .live
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), data_type.to_string());
        Ok(())
    }

    async fn load_table(&self, table: &str) -> anyhow::Result<LoadTableStats> {
        self.record(format!("load_table:{}", table));
        let (blocked, error) = {
            let state = self.state.lock().unwrap();
            (state.block_loads, state.load_errors.get(table).cloned())
        };
        if blocked {
            std::future::pending::<()>().await;
        }
        if let Some(message) = error {
            return Err(anyhow!(message));
        }
        Ok(LoadTableStats {
            rows_inserted: LOADED_ROWS,
        })
    }

    async fn fetch_schema(&self) -> anyhow::Result<Schema> {
        let mut state = self.state.lock().unwrap();
        state.fetch_schema_calls += 1;
        if let Some(message) = state.fetch_error.clone() {
            bail!(message);
        }
        match state.schemas.pop_front() {
            Some(schema) => Ok(schema),
            None => Ok(state.live.clone()),
        }
    }

    async fn cleanup(&self) {
        self.record("cleanup".into());
    }
}

// ============================================================================
// Load file generator
// ============================================================================

/// Emits one load file per staging file and table.
pub struct FakeGenerator {
    load_files: Arc<MemLoadFiles>,
    error: Mutex<Option<String>>,
    requests: Mutex<Vec<bool>>,
}

impl FakeGenerator {
    pub fn new(load_files: Arc<MemLoadFiles>) -> Self {
        Self {
            load_files,
            error: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.error.lock().unwrap() = Some(message.to_string());
    }

    /// `regenerate_all` flag of every request.
    pub fn requests(&self) -> Vec<bool> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoadFileGenerator for FakeGenerator {
    async fn create_load_files(&self, request: LoadFileRequest<'_>) -> anyhow::Result<LoadFileRange> {
        self.requests.lock().unwrap().push(request.regenerate_all);
        if let Some(message) = self.error.lock().unwrap().clone() {
            bail!(message);
        }

        let upload = request.upload;
        let mut files = Vec::new();
        for staging in request.staging_files {
            for table in staging.schema.keys().filter(|t| request.upload_schema.contains_key(*t)) {
                files.push(LoadFile {
                    id: 0,
                    upload_id: upload.id,
                    staging_file_id: staging.id,
                    source_id: upload.source_id.clone(),
                    destination_id: upload.destination_id.clone(),
                    destination_type: upload.destination_type.clone(),
                    table_name: table.clone(),
                    location: format!(
                        "s3://bucket/rudder-warehouse-load-objects/{}/{}/{}.csv.gz",
                        table, upload.source_id, staging.id
                    ),
                    total_rows: staging.total_events,
                    content_length: 128,
                    metadata: serde_json::Value::Null,
                    created_at: *NOW,
                });
            }
        }
        self.load_files.insert(&files).await?;

        let ids: Vec<i64> = self.load_files.get(upload.id).await?.iter().map(|f| f.id).collect();
        Ok(LoadFileRange {
            start_id: ids.iter().min().copied().unwrap_or(0),
            end_id: ids.iter().max().copied().unwrap_or(0),
        })
    }
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Default)]
pub struct FakeFileManager {
    calls: Mutex<Vec<Vec<String>>>,
    error: Option<String>,
    blocking: bool,
}

impl FakeFileManager {
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn blocking() -> Self {
        Self {
            blocking: true,
            ..Self::default()
        }
    }

    pub fn delete_calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileManager for FakeFileManager {
    fn download_key(&self, location: &str) -> String {
        object_key("bucket", location)
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<()> {
        if self.blocking {
            std::future::pending::<()>().await;
        }
        self.calls.lock().unwrap().push(keys.to_vec());
        match &self.error {
            Some(message) => bail!(message.clone()),
            None => Ok(()),
        }
    }
}

pub struct FakeFileManagerFactory {
    fm: Arc<FakeFileManager>,
    settings: Mutex<Vec<FileManagerSettings>>,
}

impl FakeFileManagerFactory {
    pub fn new(fm: Arc<FakeFileManager>) -> Self {
        Self {
            fm,
            settings: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> Vec<FileManagerSettings> {
        self.settings.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileManagerFactory for FakeFileManagerFactory {
    async fn create(&self, settings: &FileManagerSettings) -> anyhow::Result<Arc<dyn FileManager>> {
        self.settings.lock().unwrap().push(settings.clone());
        Ok(self.fm.clone())
    }
}

// ============================================================================
// Alerts and validation
// ============================================================================

#[derive(Default)]
pub struct FakeAlertSender {
    alerts: Mutex<Vec<Alert>>,
    fail: AtomicBool,
}

impl FakeAlertSender {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertSender for FakeAlertSender {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.fail.load(Ordering::SeqCst) {
            bail!("alert endpoint unavailable");
        }
        Ok(())
    }
}

pub struct FakeValidator {
    valid: bool,
    calls: AtomicUsize,
}

impl FakeValidator {
    pub fn new(valid: bool) -> Self {
        Self {
            valid,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationValidator for FakeValidator {
    async fn validate(&self, _destination: &Destination) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Fakes wired into a job factory. Tune `config` before building jobs.
pub struct Harness {
    pub uploads: Arc<MemUploads>,
    pub table_uploads: Arc<MemTableUploads>,
    pub staging_files: Arc<MemStagingFiles>,
    pub load_files: Arc<MemLoadFiles>,
    pub wh_schemas: Arc<MemWhSchemas>,
    pub pending: Arc<FakePendingTableUploads>,
    pub generator: Arc<FakeGenerator>,
    pub file_manager: Arc<FakeFileManager>,
    pub fm_factory: Arc<FakeFileManagerFactory>,
    pub alerts: Arc<FakeAlertSender>,
    pub validator: Arc<FakeValidator>,
    pub config: UploadJobConfig,
    pub object_delete: ObjectDeleteConfig,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_file_manager(FakeFileManager::default())
    }

    pub fn with_file_manager(fm: FakeFileManager) -> Self {
        let load_files = Arc::new(MemLoadFiles::default());
        let file_manager = Arc::new(fm);
        Self {
            uploads: Arc::new(MemUploads::default()),
            table_uploads: Arc::new(MemTableUploads::default()),
            staging_files: Arc::new(MemStagingFiles::default()),
            generator: Arc::new(FakeGenerator::new(load_files.clone())),
            load_files,
            wh_schemas: Arc::new(MemWhSchemas::default()),
            pending: Arc::new(FakePendingTableUploads::default()),
            fm_factory: Arc::new(FakeFileManagerFactory::new(file_manager.clone())),
            file_manager,
            alerts: Arc::new(FakeAlertSender::default()),
            validator: Arc::new(FakeValidator::new(false)),
            config: UploadJobConfig::default(),
            object_delete: ObjectDeleteConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn clock(&self) -> Clock {
        fixed_clock(*NOW)
    }

    pub fn repos(&self) -> Repositories {
        Repositories {
            uploads: self.uploads.clone(),
            table_uploads: self.table_uploads.clone(),
            staging_files: self.staging_files.clone(),
            load_files: self.load_files.clone(),
            wh_schemas: self.wh_schemas.clone(),
            pending_table_uploads: self.pending.clone(),
        }
    }

    pub fn factory(&self) -> UploadJobFactory {
        UploadJobFactory::new(
            JobDependencies {
                repos: self.repos(),
                load_file_generator: self.generator.clone(),
                file_manager_factory: self.fm_factory.clone(),
                alert_sender: self.alerts.clone(),
                destination_validator: Some(self.validator.clone()),
            },
            self.config.clone(),
            self.object_delete.clone(),
        )
        .with_clock(self.clock())
        .with_cancellation(self.cancel.clone())
    }

    /// Persists the upload and its staging files, then builds its job.
    pub fn job(
        &self,
        upload: Upload,
        warehouse: Warehouse,
        staging_files: Vec<StagingFile>,
        loader: Arc<FakeLoader>,
    ) -> UploadJob {
        self.uploads.put(upload.clone());
        {
            let mut stored = self.staging_files.files.lock().unwrap();
            stored.retain(|f| f.upload_id != Some(upload.id));
            stored.extend(staging_files.iter().cloned());
        }
        self.factory().new_upload_job(
            UploadJobDescriptor {
                upload,
                warehouse,
                staging_files,
            },
            loader,
        )
    }
}
