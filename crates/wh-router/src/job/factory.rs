use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::info_span;

use super::{system_clock, Clock, SharedSchemas, UploadJob};
use crate::alert::AlertSender;
use crate::backoff::RetryPolicy;
use crate::config::{ObjectDeleteConfig, UploadJobConfig};
use crate::loader::{DestinationValidator, LoadFileGenerator, WarehouseLoader};
use crate::model::staging_file::staging_file_ids;
use crate::model::UploadJobDescriptor;
use crate::repo::Repositories;
use crate::schema::CachedSchemaHandler;
use crate::stats::JobStats;
use crate::storage::FileManagerFactory;

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobDependencies {
    pub repos: Repositories,
    pub load_file_generator: Arc<dyn LoadFileGenerator>,
    pub file_manager_factory: Arc<dyn FileManagerFactory>,
    pub alert_sender: Arc<dyn AlertSender>,
    pub destination_validator: Option<Arc<dyn DestinationValidator>>,
}

/// Builds upload jobs from descriptors.
#[derive(Clone)]
pub struct UploadJobFactory {
    deps: JobDependencies,
    config: UploadJobConfig,
    object_delete: ObjectDeleteConfig,
    now: Clock,
    cancel: CancellationToken,
}

impl UploadJobFactory {
    pub fn new(
        deps: JobDependencies,
        config: UploadJobConfig,
        object_delete: ObjectDeleteConfig,
    ) -> Self {
        Self {
            deps,
            config,
            object_delete,
            now: system_clock(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, now: Clock) -> Self {
        self.now = now;
        self
    }

    /// Jobs stop at the next await point once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn new_upload_job(
        &self,
        descriptor: UploadJobDescriptor,
        loader: Arc<dyn WarehouseLoader>,
    ) -> UploadJob {
        let UploadJobDescriptor {
            upload,
            warehouse,
            staging_files,
        } = descriptor;

        let stats = JobStats::new(&warehouse, &upload);
        let schema_handler = Arc::new(CachedSchemaHandler::new(
            warehouse.clone(),
            loader.clone(),
            self.deps.repos.wh_schemas.clone(),
            self.config.schema_ttl,
            self.now.clone(),
            stats.clone(),
        ));

        let span = info_span!(
            "upload_job",
            upload_id = upload.id,
            namespace = %warehouse.namespace,
            source_id = %warehouse.source.id,
            source_type = %warehouse.source.source_type,
            destination_id = %warehouse.destination.id,
            destination_type = %warehouse.destination_type(),
            workspace_id = %warehouse.workspace_id,
            use_rudder_storage = upload.use_rudder_storage(),
        );

        let schemas = Arc::new(SharedSchemas::default());
        schemas.set_upload(upload.upload_schema.clone());

        UploadJob {
            staging_file_ids: staging_file_ids(&staging_files),
            upload,
            warehouse,
            staging_files,
            repos: self.deps.repos.clone(),
            loader,
            load_file_generator: self.deps.load_file_generator.clone(),
            schema_handler,
            file_manager_factory: self.deps.file_manager_factory.clone(),
            alert_sender: self.deps.alert_sender.clone(),
            destination_validator: self.deps.destination_validator.clone(),
            policy: RetryPolicy::from(&self.config),
            config: self.config.clone(),
            object_delete: self.object_delete.clone(),
            stats,
            now: self.now.clone(),
            cancel: self.cancel.child_token(),
            span,
            tables_to_skip: OnceCell::new(),
            schemas,
        }
    }
}
