//! Preparation phases that run before the export.

use tracing::{debug, info};

use super::UploadJob;
use crate::error::{ExternalErr, Result, WrapErr};
use crate::loader::LoadFileRequest;
use crate::model::warehouse::always_regenerates_load_files;
use crate::model::TableUploadUpdate;
use crate::repo::UploadField;

impl UploadJob {
    pub(super) async fn generate_upload_schema(&mut self) -> Result<()> {
        let schema = self
            .schema_handler
            .consolidate_staging_files_schema(&self.staging_files)
            .await
            .wrap_err("consolidating staging files schema")?;

        self.repos
            .uploads
            .update(self.upload.id, &[UploadField::Schema(schema.clone())])
            .await
            .wrap_err("storing upload schema")?;
        debug!(tables = schema.len(), "Generated upload schema");

        self.schemas.set_upload(schema.clone());
        self.upload.upload_schema = schema;
        self.refresh_warehouse_snapshot().await
    }

    pub(super) async fn create_table_uploads(&mut self) -> Result<()> {
        let tables: Vec<String> = self.upload.upload_schema.keys().cloned().collect();
        self.repos
            .table_uploads
            .insert(self.upload.id, &tables)
            .await
            .wrap_err("creating table uploads")
    }

    pub(super) async fn generate_load_files(&mut self) -> Result<()> {
        let regenerate_all = self.config.always_regenerate_all_load_files
            || always_regenerates_load_files(self.warehouse.destination_type());
        if regenerate_all {
            self.repos
                .load_files
                .delete(self.upload.id, &self.staging_file_ids)
                .await
                .wrap_err("deleting previous load files")?;
        }

        let range = self
            .load_file_generator
            .create_load_files(LoadFileRequest {
                upload: &self.upload,
                warehouse: &self.warehouse,
                staging_files: &self.staging_files,
                upload_schema: &self.upload.upload_schema,
                regenerate_all,
            })
            .await
            .external("creating load files")?;

        self.repos
            .uploads
            .update(
                self.upload.id,
                &[
                    UploadField::LoadFileStartId(range.start_id),
                    UploadField::LoadFileEndId(range.end_id),
                ],
            )
            .await
            .wrap_err("storing load file range")?;
        self.upload.load_file_start_id = Some(range.start_id);
        self.upload.load_file_end_id = Some(range.end_id);
        info!(start_id = range.start_id, end_id = range.end_id, "Generated load files");
        Ok(())
    }

    pub(super) async fn update_table_uploads_counts(&mut self) -> Result<()> {
        let counts = self
            .repos
            .load_files
            .total_rows_by_table(self.upload.id)
            .await
            .wrap_err("counting load file rows")?;

        let tables: Vec<String> = match (self.upload.load_file_start_id, self.upload.load_file_end_id)
        {
            (Some(start), Some(end)) => self
                .repos
                .load_files
                .distinct_table_name(&self.upload.source_id, &self.upload.destination_id, start, end)
                .await
                .wrap_err("listing load file tables")?,
            _ => counts.iter().map(|(table, _)| table.clone()).collect(),
        };

        for (table, total_events) in counts.iter().filter(|(t, _)| tables.contains(t)) {
            let location = self
                .repos
                .load_files
                .get_filtered(self.upload.id, Some(table), Some(1))
                .await?
                .into_iter()
                .next()
                .map(|f| f.location);
            self.repos
                .table_uploads
                .update(
                    self.upload.id,
                    table,
                    &TableUploadUpdate {
                        total_events: Some(*total_events),
                        location,
                        ..TableUploadUpdate::default()
                    },
                )
                .await
                .wrap_err(format!("updating counts of table {}", table))?;
        }
        Ok(())
    }

    pub(super) async fn create_remote_schema(&mut self) -> Result<()> {
        if self.schema_handler.is_warehouse_schema_empty().await? {
            info!(namespace = %self.warehouse.namespace, "Creating remote schema");
            self.loader
                .create_schema()
                .await
                .external("creating remote schema")?;
        }
        Ok(())
    }

    /// Mirrors the cached warehouse schema into the loader's snapshot.
    pub(super) async fn refresh_warehouse_snapshot(&self) -> Result<()> {
        let warehouse = self.schema_handler.warehouse_schema().await?;
        self.schemas.set_warehouse(warehouse);
        Ok(())
    }
}
