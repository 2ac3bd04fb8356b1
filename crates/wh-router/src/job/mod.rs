//! The upload job
//!
//! One job owns one upload. It walks the persisted state machine phase by
//! phase, records failures against the state that produced them and stops
//! at the first failure; the router runs it again once the backoff has
//! elapsed. Resumption only depends on the persisted status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument, Span};

use crate::alert::AlertSender;
use crate::backoff::RetryPolicy;
use crate::config::{ObjectDeleteConfig, UploadJobConfig};
use crate::error::{Result, RouterError};
use crate::loader::{DestinationValidator, LoadFileGenerator, WarehouseLoader};
use crate::model::{StagingFile, Upload, Warehouse};
use crate::repo::{Repositories, UploadField};
use crate::schema::SchemaHandler;
use crate::state::{next_transition, Phase, StateTransition, UploadState};
use crate::stats::{JobStats, LONG_RUNNING_UPLOAD, NUM_STAGED_EVENTS, UPLOAD_SUCCESS, UPLOAD_TIME};
use crate::storage::FileManagerFactory;

mod cleanup;
mod export;
mod factory;
mod phases;
mod status;
mod tables;
mod uploader;

pub use factory::{JobDependencies, UploadJobFactory};
pub use tables::TablesToSkip;
pub use uploader::{JobUploader, SharedSchemas};

/// Source of "now" for a job; injectable so tests can pin time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A failed phase and the status it leaves the upload in.
#[derive(Debug)]
struct PhaseFailure {
    status: UploadState,
    error: RouterError,
}

impl PhaseFailure {
    fn new(status: UploadState, error: RouterError) -> Self {
        Self { status, error }
    }
}

pub struct UploadJob {
    upload: Upload,
    warehouse: Warehouse,
    staging_files: Vec<StagingFile>,
    staging_file_ids: Vec<i64>,

    repos: Repositories,
    loader: Arc<dyn WarehouseLoader>,
    load_file_generator: Arc<dyn LoadFileGenerator>,
    schema_handler: Arc<dyn SchemaHandler>,
    file_manager_factory: Arc<dyn FileManagerFactory>,
    alert_sender: Arc<dyn AlertSender>,
    destination_validator: Option<Arc<dyn DestinationValidator>>,

    config: UploadJobConfig,
    object_delete: ObjectDeleteConfig,
    policy: RetryPolicy,
    stats: JobStats,
    now: Clock,
    cancel: CancellationToken,
    span: Span,

    tables_to_skip: OnceCell<std::result::Result<TablesToSkip, String>>,
    schemas: Arc<SharedSchemas>,
}

impl UploadJob {
    pub fn upload(&self) -> &Upload {
        &self.upload
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Runs the upload until it is exported or a phase fails.
    pub async fn run(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<()> {
        match self.upload.status {
            UploadState::ExportedData => {
                info!("Upload already exported, nothing to do");
                return Ok(());
            },
            UploadState::Aborted => return Err(RouterError::UploadAborted(self.upload.id)),
            _ => {},
        }

        let started = Instant::now();
        let done = CancellationToken::new();
        let watchdog = spawn_watchdog(
            self.config.long_running_upload_threshold,
            done.clone(),
            self.stats.clone(),
        );

        info!("Starting upload job");
        let now = (self.now)();
        if let Err(e) = self
            .repos
            .uploads
            .update(
                self.upload.id,
                &[UploadField::LastExecAt(now), UploadField::InProgress(true)],
            )
            .await
        {
            warn!(error = %e, "Failed to mark upload as in progress");
        }
        self.upload.in_progress = true;
        self.upload.last_exec_at = Some(now);

        let result = self.run_phases().await;

        if let Err(e) = self
            .repos
            .uploads
            .update(self.upload.id, &[UploadField::InProgress(false)])
            .await
        {
            warn!(error = %e, "Failed to clear upload in-progress flag");
        }
        self.upload.in_progress = false;
        self.stats.timing(UPLOAD_TIME, started.elapsed());

        done.cancel();
        if let Err(e) = watchdog.await {
            warn!(error = %e, "Long running upload watchdog failed");
        }

        result
    }

    async fn run_phases(&mut self) -> Result<()> {
        if self.staging_files.is_empty() {
            let err = RouterError::NoStagingFiles;
            self.record_failure(&err, UploadState::InternalProcessingFailed).await;
            return Err(err);
        }

        info!("Setting up warehouse loader");
        let uploader = Arc::new(self.uploader());
        if let Err(e) = self.loader.setup(&self.warehouse, uploader).await {
            let err = RouterError::external("setting up warehouse loader", e);
            self.record_failure(&err, UploadState::InternalProcessingFailed).await;
            return Err(err);
        }

        let result = self.state_loop().await;
        self.loader.cleanup().await;
        result
    }

    async fn state_loop(&mut self) -> Result<()> {
        let Some(mut transition) = next_transition(self.upload.status) else {
            return Ok(());
        };

        loop {
            let state_started = Instant::now();
            self.set_upload_status(transition.in_progress, Vec::new()).await?;

            let cancel = self.cancel.clone();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(PhaseFailure::new(transition.failed, RouterError::Cancelled)),
                res = self.execute(transition) => res,
            };

            if let Err(failure) = outcome {
                if failure.error.is_cancelled() {
                    warn!(state = %transition.in_progress, "Upload job cancelled");
                    return Err(failure.error);
                }
                if failure.status == UploadState::Waiting {
                    self.reset_to_waiting(&failure.error).await;
                } else {
                    self.record_failure(&failure.error, failure.status).await;
                }
                return Err(RouterError::Context {
                    context: "upload job failed".to_string(),
                    source: Box::new(failure.error),
                });
            }

            let completed = transition.completed;
            let metrics = if completed == UploadState::ExportedData {
                self.exported_metrics().await
            } else {
                Vec::new()
            };
            self.set_upload_status(completed, metrics).await?;
            self.stats
                .timing(&format!("{}_time", transition.in_progress), state_started.elapsed());

            if completed == UploadState::ExportedData {
                self.on_exported().await;
                return Ok(());
            }

            match next_transition(completed) {
                Some(next) => transition = next,
                None => return Ok(()),
            }
        }
    }

    async fn execute(&mut self, transition: &StateTransition) -> std::result::Result<(), PhaseFailure> {
        let failed = transition.failed;
        let fail = |e: RouterError| PhaseFailure::new(failed, e);
        match transition.phase {
            Phase::GenerateUploadSchema => self.generate_upload_schema().await.map_err(fail),
            Phase::CreateTableUploads => self.create_table_uploads().await.map_err(fail),
            Phase::GenerateLoadFiles => self.generate_load_files().await.map_err(fail),
            Phase::UpdateTableUploadsCounts => self.update_table_uploads_counts().await.map_err(fail),
            Phase::CreateRemoteSchema => self.create_remote_schema().await.map_err(fail),
            Phase::ExportData => {
                if let Err(e) = self.export_data().await {
                    if e.is_cancelled() {
                        return Err(fail(e));
                    }
                    let status = if self.schema_drifted().await {
                        UploadState::Waiting
                    } else {
                        failed
                    };
                    return Err(PhaseFailure::new(status, e));
                }
                self.cleanup_object_storage_files().await.map_err(fail)
            },
        }
    }

    /// Only consulted after an export failure. A failing check keeps the
    /// original failure; an outdated cache is invalidated for the destination.
    async fn schema_drifted(&self) -> bool {
        let outdated = match self.schema_handler.is_schema_outdated().await {
            Ok(outdated) => outdated,
            Err(e) => {
                warn!(error = %e, "Error checking if warehouse schema is outdated");
                return false;
            },
        };
        if !outdated {
            return false;
        }

        match self
            .repos
            .wh_schemas
            .set_expiry_for_destination(&self.warehouse.destination.id, (self.now)())
            .await
        {
            Ok(()) => info!("Invalidated warehouse schema cache due to sync error"),
            Err(e) => warn!(error = %e, "Failed to invalidate schema cache"),
        }
        info!("Warehouse schema cache is outdated, moving upload back to waiting");
        true
    }

    async fn on_exported(&self) {
        self.stats.count(UPLOAD_SUCCESS, 1);
        let staged: i64 = self.staging_files.iter().map(|f| f.total_events).sum();
        self.stats.count(NUM_STAGED_EVENTS, staged.max(0) as u64);

        if let Err(e) = self
            .repos
            .load_files
            .delete(self.upload.id, &self.staging_file_ids)
            .await
        {
            warn!(error = %e, "Failed to delete load files of exported upload");
        }
        info!("Upload exported");
    }
}

/// Counts a long running upload once `threshold` passes before `done` fires.
/// Resolves to whether the stat was emitted.
fn spawn_watchdog(threshold: Duration, done: CancellationToken, stats: JobStats) -> JoinHandle<bool> {
    tokio::spawn(
        async move {
            tokio::select! {
                _ = done.cancelled() => false,
                _ = tokio::time::sleep(threshold) => {
                    info!(threshold_secs = threshold.as_secs(), "Registering stat for long running upload");
                    stats.count(LONG_RUNNING_UPLOAD, 1);
                    true
                }
            }
        }
        .instrument(Span::current()),
    )
}
