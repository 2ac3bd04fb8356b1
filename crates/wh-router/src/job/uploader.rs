use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use super::UploadJob;
use crate::loader::Uploader;
use crate::model::{LoadFile, Schema, TableSchema};
use crate::repo::{LoadFilesRepo, TableUploadsRepo, WhSchemaRepo};
use crate::schema::SchemaHandler;

/// Snapshot of the upload and warehouse schemas shared with the loader.
/// Refreshed by the job whenever either side changes.
#[derive(Debug, Default)]
pub struct SharedSchemas {
    upload: RwLock<Schema>,
    warehouse: RwLock<Schema>,
}

impl SharedSchemas {
    pub fn set_upload(&self, schema: Schema) {
        *self.upload.write().unwrap_or_else(PoisonError::into_inner) = schema;
    }

    pub fn set_warehouse(&self, schema: Schema) {
        *self.warehouse.write().unwrap_or_else(PoisonError::into_inner) = schema;
    }

    pub fn upload_table(&self, table: &str) -> TableSchema {
        self.upload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn warehouse_table(&self, table: &str) -> TableSchema {
        self.warehouse
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_warehouse_empty(&self) -> bool {
        self.warehouse
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// The loader's window onto a running upload.
pub struct JobUploader {
    upload_id: i64,
    destination_id: String,
    namespace: String,
    table_uploads: Arc<dyn TableUploadsRepo>,
    load_files: Arc<dyn LoadFilesRepo>,
    wh_schemas: Arc<dyn WhSchemaRepo>,
    schema_handler: Arc<dyn SchemaHandler>,
    schemas: Arc<SharedSchemas>,
    use_rudder_storage: bool,
    load_file_type: String,
    dedup_uses_new_record: bool,
    can_append: bool,
}

impl UploadJob {
    pub(super) fn uploader(&self) -> JobUploader {
        let category = self.warehouse.source.category.as_str();
        JobUploader {
            upload_id: self.upload.id,
            destination_id: self.warehouse.destination.id.clone(),
            namespace: self.warehouse.namespace.clone(),
            table_uploads: self.repos.table_uploads.clone(),
            load_files: self.repos.load_files.clone(),
            wh_schemas: self.repos.wh_schemas.clone(),
            schema_handler: self.schema_handler.clone(),
            schemas: self.schemas.clone(),
            use_rudder_storage: self.upload.use_rudder_storage(),
            load_file_type: self.upload.metadata.load_file_type.clone(),
            dedup_uses_new_record: matches!(category, "cloud" | "singer-protocol"),
            can_append: self.can_append(),
        }
    }
}

#[async_trait]
impl Uploader for JobUploader {
    fn table_schema_in_warehouse(&self, table: &str) -> TableSchema {
        self.schemas.warehouse_table(table)
    }

    fn table_schema_in_upload(&self, table: &str) -> TableSchema {
        self.schemas.upload_table(table)
    }

    fn is_warehouse_schema_empty(&self) -> bool {
        self.schemas.is_warehouse_empty()
    }

    async fn single_load_file(&self, table: &str) -> anyhow::Result<LoadFile> {
        let table_upload = self
            .table_uploads
            .get_by_upload_id_and_table_name(self.upload_id, table)
            .await?;
        let location = table_upload
            .location
            .ok_or_else(|| anyhow!("no load file location for table:{}", table))?;

        let files = self
            .load_files
            .get_filtered(self.upload_id, Some(table), None)
            .await?;
        files
            .into_iter()
            .find(|f| f.location == location)
            .ok_or_else(|| anyhow!("no load file found at {} for table:{}", location, table))
    }

    async fn load_files_metadata(
        &self,
        table: &str,
        limit: Option<i64>,
    ) -> anyhow::Result<Vec<LoadFile>> {
        Ok(self
            .load_files
            .get_filtered(self.upload_id, Some(table), limit)
            .await?)
    }

    async fn sample_load_file_location(&self, table: &str) -> anyhow::Result<String> {
        let files = self
            .load_files
            .get_filtered(self.upload_id, Some(table), Some(1))
            .await?;
        files
            .into_iter()
            .next()
            .map(|f| f.location)
            .ok_or_else(|| anyhow!("no load file found for table:{}", table))
    }

    fn use_rudder_storage(&self) -> bool {
        self.use_rudder_storage
    }

    fn should_on_dedup_use_new_record(&self) -> bool {
        self.dedup_uses_new_record
    }

    fn can_append(&self) -> bool {
        self.can_append
    }

    fn load_file_type(&self) -> String {
        self.load_file_type.clone()
    }

    async fn local_schema(&self) -> anyhow::Result<Schema> {
        let stored = self
            .wh_schemas
            .get_for_namespace(&self.destination_id, &self.namespace)
            .await
            .context("getting schema for namespace")?;
        Ok(stored.map(|s| s.schema).unwrap_or_default())
    }

    async fn update_local_schema(&self, schema: Schema) -> anyhow::Result<()> {
        self.schema_handler
            .update_schema(schema.clone())
            .await
            .context("updating local schema")?;
        self.schemas.set_warehouse(schema);
        Ok(())
    }
}
