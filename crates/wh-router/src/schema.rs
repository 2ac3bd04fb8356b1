//! Warehouse schema cache for a destination namespace.
//!
//! The cached schema lives in `wh_schemas` with an expiry. It is loaded
//! lazily, refreshed from the warehouse once expired, and compared against
//! the live schema when an export fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ExternalErr, Result};
use crate::job::Clock;
use crate::loader::WarehouseLoader;
use crate::model::{Schema, StagingFile, TableSchema, TableSchemaDiff, Warehouse, WhSchema};
use crate::repo::WhSchemaRepo;
use crate::stats::{JobStats, CONSOLIDATED_SCHEMA_SIZE};

#[async_trait]
pub trait SchemaHandler: Send + Sync {
    async fn is_warehouse_schema_empty(&self) -> Result<bool>;

    /// Cached warehouse schema of one table; empty when unknown.
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;

    async fn warehouse_schema(&self) -> Result<Schema>;

    /// Replaces the cached schema and persists it.
    async fn update_schema(&self, schema: Schema) -> Result<()>;

    async fn update_table_schema(&self, table: &str, table_schema: TableSchema) -> Result<()>;

    /// True when the live warehouse schema differs from the cached one.
    async fn is_schema_outdated(&self) -> Result<bool>;

    async fn consolidate_staging_files_schema(&self, files: &[StagingFile]) -> Result<Schema>;

    async fn table_schema_diff(&self, table: &str, in_upload: &TableSchema)
        -> Result<TableSchemaDiff>;
}

/// Merges staging file schemas. Types already in the warehouse win, `text`
/// beats `string`, otherwise the first type seen is kept.
pub fn consolidate_schemas<'a>(
    warehouse: &Schema,
    staging: impl IntoIterator<Item = &'a Schema>,
) -> Schema {
    let mut consolidated = Schema::new();
    for schema in staging {
        for (table, columns) in schema {
            let target = consolidated.entry(table.clone()).or_default();
            for (column, data_type) in columns {
                match target.get(column) {
                    None => {
                        target.insert(column.clone(), data_type.clone());
                    },
                    Some(existing) if existing == "string" && data_type == "text" => {
                        target.insert(column.clone(), data_type.clone());
                    },
                    Some(_) => {},
                }
            }
        }
    }

    for (table, columns) in consolidated.iter_mut() {
        let Some(in_warehouse) = warehouse.get(table) else {
            continue;
        };
        for (column, data_type) in columns.iter_mut() {
            match in_warehouse.get(column) {
                Some(wh_type) if wh_type == "string" && data_type == "text" => {},
                Some(wh_type) => *data_type = wh_type.clone(),
                None => {},
            }
        }
    }
    consolidated
}

pub struct CachedSchemaHandler {
    warehouse: Warehouse,
    loader: Arc<dyn WarehouseLoader>,
    repo: Arc<dyn WhSchemaRepo>,
    ttl: Duration,
    now: Clock,
    stats: JobStats,
    cache: RwLock<Option<Schema>>,
}

impl CachedSchemaHandler {
    pub fn new(
        warehouse: Warehouse,
        loader: Arc<dyn WarehouseLoader>,
        repo: Arc<dyn WhSchemaRepo>,
        ttl: Duration,
        now: Clock,
        stats: JobStats,
    ) -> Self {
        Self {
            warehouse,
            loader,
            repo,
            ttl,
            now,
            stats,
            cache: RwLock::new(None),
        }
    }

    async fn schema(&self) -> Result<Schema> {
        if let Some(schema) = self.cache.read().await.as_ref() {
            return Ok(schema.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(schema) = cache.as_ref() {
            return Ok(schema.clone());
        }

        let now = (self.now)();
        let stored = self
            .repo
            .get_for_namespace(&self.warehouse.destination.id, &self.warehouse.namespace)
            .await?;
        let schema = match stored {
            Some(stored) if stored.expires_at > now => stored.schema,
            _ => {
                debug!(namespace = %self.warehouse.namespace, "Schema cache missing or expired, fetching from warehouse");
                let live = self
                    .loader
                    .fetch_schema()
                    .await
                    .external("fetching schema from warehouse")?;
                self.persist(&live).await?;
                live
            },
        };

        *cache = Some(schema.clone());
        Ok(schema)
    }

    async fn persist(&self, schema: &Schema) -> Result<()> {
        let now = (self.now)();
        let expires_at = now
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.repo
            .insert(&WhSchema {
                id: 0,
                source_id: self.warehouse.source.id.clone(),
                destination_id: self.warehouse.destination.id.clone(),
                namespace: self.warehouse.namespace.clone(),
                schema: schema.clone(),
                created_at: now,
                updated_at: now,
                expires_at,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaHandler for CachedSchemaHandler {
    async fn is_warehouse_schema_empty(&self) -> Result<bool> {
        Ok(self.schema().await?.is_empty())
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(self.schema().await?.get(table).cloned().unwrap_or_default())
    }

    async fn warehouse_schema(&self) -> Result<Schema> {
        self.schema().await
    }

    async fn update_schema(&self, schema: Schema) -> Result<()> {
        self.persist(&schema).await?;
        *self.cache.write().await = Some(schema);
        Ok(())
    }

    /// Tables load in parallel; the write lock spans the read-modify-write.
    async fn update_table_schema(&self, table: &str, table_schema: TableSchema) -> Result<()> {
        let loaded = self.schema().await?;
        let mut cache = self.cache.write().await;
        let mut schema = cache.take().unwrap_or(loaded);
        schema.insert(table.to_string(), table_schema);
        let persisted = self.persist(&schema).await;
        *cache = Some(schema);
        persisted
    }

    async fn is_schema_outdated(&self) -> Result<bool> {
        let cached = self.schema().await?;
        let live = self
            .loader
            .fetch_schema()
            .await
            .external("fetching schema from warehouse")?;
        let outdated = live != cached;
        if outdated {
            info!(namespace = %self.warehouse.namespace, "Cached warehouse schema is outdated");
        }
        Ok(outdated)
    }

    async fn consolidate_staging_files_schema(&self, files: &[StagingFile]) -> Result<Schema> {
        let warehouse = self.schema().await?;
        let consolidated = consolidate_schemas(&warehouse, files.iter().map(|f| &f.schema));
        self.stats.histogram(
            CONSOLIDATED_SCHEMA_SIZE,
            consolidated.values().map(|t| t.len()).sum::<usize>() as f64,
        );
        Ok(consolidated)
    }

    async fn table_schema_diff(
        &self,
        table: &str,
        in_upload: &TableSchema,
    ) -> Result<TableSchemaDiff> {
        let in_warehouse = self.table_schema(table).await?;
        Ok(TableSchemaDiff::compute(&in_warehouse, in_upload))
    }
}
