//! Polling loop that picks due uploads and runs their jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RouterLoopConfig;
use crate::error::Result;
use crate::job::{Clock, UploadJobFactory};
use crate::loader::WarehouseLoader;
use crate::model::{Upload, UploadJobDescriptor};
use crate::repo::{UploadField, UploadsRepo};

/// Resolves the warehouse loader for a destination type.
pub trait LoaderProvider: Send + Sync {
    fn loader(&self, destination_type: &str) -> Option<Arc<dyn WarehouseLoader>>;
}

/// Looks up the warehouse and staging files of an upload.
#[async_trait]
pub trait WarehouseCatalog: Send + Sync {
    async fn descriptor(&self, upload: Upload) -> Result<UploadJobDescriptor>;
}

pub struct Router {
    config: RouterLoopConfig,
    uploads: Arc<dyn UploadsRepo>,
    catalog: Arc<dyn WarehouseCatalog>,
    loaders: Arc<dyn LoaderProvider>,
    factory: UploadJobFactory,
    now: Clock,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(
        config: RouterLoopConfig,
        uploads: Arc<dyn UploadsRepo>,
        catalog: Arc<dyn WarehouseCatalog>,
        loaders: Arc<dyn LoaderProvider>,
        factory: UploadJobFactory,
        now: Clock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            uploads,
            catalog,
            loaders,
            factory,
            now,
            cancel,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting upload router"
        );

        match self.uploads.reset_in_progress(None).await {
            Ok(0) => {},
            Ok(reset) => info!(reset, "Reset uploads left in progress by a previous run"),
            Err(e) => warn!(error = %e, "Failed to reset in-progress uploads"),
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut jobs: JoinSet<()> = JoinSet::new();
        // task id -> upload id
        let mut running: HashMap<Id, i64> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(joined) = jobs.join_next_with_id(), if !jobs.is_empty() => {
                    self.reap(joined, &mut running).await;
                },
                _ = ticker.tick() => {
                    let free = self.config.max_concurrent_jobs.saturating_sub(running.len());
                    if free == 0 {
                        continue;
                    }
                    if let Err(e) = self.schedule(free, &mut jobs, &mut running).await {
                        warn!(error = %e, "Failed to pick due uploads");
                    }
                },
            }
        }

        info!(running = running.len(), "Stopping upload router, waiting for jobs");
        while let Some(joined) = jobs.join_next_with_id().await {
            self.reap(joined, &mut running).await;
        }
        info!("Upload router stopped");
    }

    async fn schedule(
        &self,
        free: usize,
        jobs: &mut JoinSet<()>,
        running: &mut HashMap<Id, i64>,
    ) -> Result<()> {
        let due = self
            .uploads
            .due_uploads((self.now)(), i64::try_from(free).unwrap_or(i64::MAX))
            .await?;
        debug!(due = due.len(), "Picked due uploads");

        for upload in due {
            let id = upload.id;
            if running.values().any(|&upload_id| upload_id == id) {
                continue;
            }
            let Some(loader) = self.loaders.loader(&upload.destination_type) else {
                warn!(upload_id = id, destination_type = %upload.destination_type, "No loader for destination type");
                continue;
            };
            let descriptor = match self.catalog.descriptor(upload).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(upload_id = id, error = %e, "Failed to resolve upload warehouse");
                    continue;
                },
            };

            let mut job = self.factory.new_upload_job(descriptor, loader);
            let task = jobs.spawn(async move {
                if let Err(e) = job.run().await {
                    warn!(upload_id = id, error = %e, "Upload job finished with error");
                }
            });
            running.insert(task.id(), id);
        }
        Ok(())
    }

    /// Frees the slot of a finished job. A job that panicked never cleared
    /// its `in_progress` flag, so that is done here.
    async fn reap(
        &self,
        joined: std::result::Result<(Id, ()), JoinError>,
        running: &mut HashMap<Id, i64>,
    ) {
        let err = match joined {
            Ok((task, ())) => {
                running.remove(&task);
                return;
            },
            Err(e) => e,
        };

        let Some(upload_id) = running.remove(&err.id()) else {
            error!(error = %err, "Unknown upload job task failed");
            return;
        };
        error!(upload_id, error = %err, "Upload job task failed");
        if let Err(e) = self
            .uploads
            .update(upload_id, &[UploadField::InProgress(false)])
            .await
        {
            warn!(upload_id, error = %e, "Failed to clear in-progress flag of failed job");
        }
    }
}
