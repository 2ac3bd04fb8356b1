use std::time::Instant;

use tracing::info;

use super::UploadJob;
use crate::error::{ExternalErr, Result, WrapErr};
use crate::model::warehouse::{is_datalake, CLEANUP_OBJECT_STORAGE_FILES_SETTING};
use crate::model::ObjectStorageProvider;
use crate::stats::{OBJECTS_DELETED_COUNT, OBJECTS_DELETION_TIME};
use crate::storage::{delete_in_chunks, FileManagerSettings};

impl UploadJob {
    /// Removes the upload's staging files, and its load files unless the
    /// destination is a data lake, once the export succeeded. Opt-in per
    /// destination.
    pub(super) async fn cleanup_object_storage_files(&self) -> Result<()> {
        let destination = &self.warehouse.destination;
        if !destination.bool_setting(CLEANUP_OBJECT_STORAGE_FILES_SETTING) {
            return Ok(());
        }

        let use_rudder_storage = self.upload.use_rudder_storage();
        let provider = ObjectStorageProvider::for_destination(
            self.warehouse.destination_type(),
            &destination.config,
            use_rudder_storage,
        );
        let fm = self
            .file_manager_factory
            .create(&FileManagerSettings {
                provider,
                config: destination.config.clone(),
                workspace_id: self.warehouse.workspace_id.clone(),
                use_rudder_storage,
            })
            .await
            .external("creating file manager")?;

        let mut keys: Vec<String> = self
            .staging_files
            .iter()
            .map(|f| fm.download_key(&f.location))
            .collect();
        if !is_datalake(self.warehouse.destination_type()) {
            let load_files = self
                .repos
                .load_files
                .get(self.upload.id)
                .await
                .wrap_err("listing load files for cleanup")?;
            keys.extend(load_files.iter().map(|f| fm.download_key(&f.location)));
        }
        if keys.is_empty() {
            return Ok(());
        }
        self.stats.gauge(OBJECTS_DELETED_COUNT, keys.len() as f64);

        let workspace = &self.warehouse.workspace_id;
        let (concurrency, chunk_size) = if provider.supports_batch_delete() {
            (1, keys.len())
        } else {
            (
                self.object_delete.concurrency_for(workspace),
                self.object_delete.batch_size_for(workspace),
            )
        };

        info!(keys = keys.len(), %provider, concurrency, chunk_size, "Deleting files from object storage");
        let started = Instant::now();
        delete_in_chunks(fm, keys, concurrency, chunk_size, &self.cancel)
            .await
            .external("deleting files from object storage")?;
        self.stats.timing(OBJECTS_DELETION_TIME, started.elapsed());
        Ok(())
    }
}
