//! Data export: schema reconciliation and per-table loads.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use super::UploadJob;
use crate::alert::{Alert, Severity};
use crate::error::{ExternalErr, Result, RouterError, WrapErr};
use crate::model::warehouse::{to_provider_case, IDENTIFIES_TABLE, USERS_TABLE};
use crate::model::{TableSchema, TableUploadStatus, TableUploadUpdate};

impl UploadJob {
    /// Loads every table of the upload schema not in the skip set. Identity
    /// tables go last and in order, after all other tables have been tried.
    pub(super) async fn export_data(&self) -> Result<()> {
        let skip = self.tables_to_skip().await?;
        self.refresh_warehouse_snapshot().await?;

        let dest_type = self.warehouse.destination_type();
        let identities = [
            to_provider_case(dest_type, IDENTIFIES_TABLE),
            to_provider_case(dest_type, USERS_TABLE),
        ];

        let tables: Vec<&String> = self
            .upload
            .upload_schema
            .keys()
            .filter(|t| !skip.contains(t))
            .collect();
        let (identity_tables, regular): (Vec<&String>, Vec<&String>) =
            tables.into_iter().partition(|t| identities.contains(*t));

        info!(
            tables = regular.len(),
            identity_tables = identity_tables.len(),
            skipped = self.upload.upload_schema.len() - regular.len() - identity_tables.len(),
            "Exporting data"
        );

        let mut failures: Vec<String> = stream::iter(regular)
            .map(|table| async move {
                self.export_table(table)
                    .await
                    .err()
                    .map(|e| format!("{}: {}", table, e))
            })
            .buffer_unordered(self.config.max_parallel_table_loads.max(1))
            .filter_map(|failure| async move { failure })
            .collect::<Vec<String>>()
            .boxed()
            .await;

        for identity in identities.iter() {
            if let Some(table) = identity_tables.iter().find(|t| **t == identity) {
                if let Err(e) = self.export_table(table).await {
                    failures.push(format!("{}: {}", table, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort();
            Err(RouterError::TableLoads(failures))
        }
    }

    async fn export_table(&self, table: &str) -> Result<()> {
        self.set_table_status(table, TableUploadStatus::Executing, Some((self.now)()))
            .await?;

        self.set_table_status(table, TableUploadStatus::UpdatingSchema, None)
            .await?;
        if let Err(e) = self.update_table_schema(table).await {
            self.set_table_failed(table, TableUploadStatus::UpdatingSchemaFailed, &e)
                .await;
            return Err(e);
        }
        self.set_table_status(table, TableUploadStatus::UpdatedSchema, None)
            .await?;

        self.set_table_status(table, TableUploadStatus::ExportingData, None)
            .await?;
        match self.loader.load_table(table).await {
            Ok(stats) => {
                self.repos
                    .table_uploads
                    .update(
                        self.upload.id,
                        table,
                        &TableUploadUpdate {
                            status: Some(TableUploadStatus::ExportedData),
                            total_events: Some(stats.rows_inserted),
                            ..TableUploadUpdate::default()
                        },
                    )
                    .await
                    .wrap_err(format!("marking table {} exported", table))?;
                self.stats.rows_synced(table, stats.rows_inserted);
                Ok(())
            },
            Err(e) => {
                let err = RouterError::external("loading table", e);
                self.set_table_failed(table, TableUploadStatus::ExportingDataFailed, &err)
                    .await;
                Err(err)
            },
        }
    }

    async fn set_table_status(
        &self,
        table: &str,
        status: TableUploadStatus,
        last_exec_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.repos
            .table_uploads
            .update(
                self.upload.id,
                table,
                &TableUploadUpdate {
                    status: Some(status),
                    last_exec_time,
                    ..TableUploadUpdate::default()
                },
            )
            .await
            .wrap_err(format!("setting table {} to {}", table, status))
    }

    async fn set_table_failed(&self, table: &str, status: TableUploadStatus, err: &RouterError) {
        if let Err(e) = self
            .repos
            .table_uploads
            .update(
                self.upload.id,
                table,
                &TableUploadUpdate::failed(status, err.to_string()),
            )
            .await
        {
            warn!(table, error = %e, "Failed to record table upload error");
        }
    }

    /// Brings one warehouse table in line with the upload schema.
    ///
    /// Alter failures raise a single alert and fail the table without
    /// touching the cache, so the next attempt diffs against the same state.
    pub(super) async fn update_table_schema(&self, table: &str) -> Result<()> {
        let in_upload = self
            .upload
            .upload_schema
            .get(table)
            .cloned()
            .unwrap_or_default();
        let diff = self
            .schema_handler
            .table_schema_diff(table, &in_upload)
            .await?;
        if !diff.exists() {
            return Ok(());
        }
        let mut updated = diff.updated_schema.clone();

        if diff.table_to_be_created {
            info!(table, columns = diff.added_columns.len(), "Creating table");
            self.loader
                .create_table(table, &diff.added_columns)
                .await
                .external(format!("creating table {}", table))?;
        } else if !diff.added_columns.is_empty() {
            let columns: Vec<_> = diff.added_columns.iter().collect();
            for batch in columns.chunks(self.config.columns_batch_size.max(1)) {
                let batch: TableSchema = batch
                    .iter()
                    .map(|(c, t)| (c.to_string(), t.to_string()))
                    .collect();
                self.loader
                    .add_columns(table, &batch)
                    .await
                    .external(format!("adding columns to table {}", table))?;
            }
        }

        if !diff.altered_columns.is_empty() {
            if self.config.disable_alter {
                for column in diff.altered_columns.keys() {
                    updated.insert(column.clone(), "string".to_string());
                }
            } else {
                let mut failed = Vec::new();
                for (column, data_type) in &diff.altered_columns {
                    if let Err(e) = self.loader.alter_column(table, column, data_type).await {
                        error!(table, column = %column, error = %e, "Failed to alter column");
                        failed.push(column.clone());
                    }
                }
                if !failed.is_empty() {
                    let alert = Alert {
                        resource: format!("{}:{}", self.warehouse.destination.id, table),
                        event: "alter_column_failed".to_string(),
                        severity: Severity::Warning,
                        text: format!("failed to alter columns {} of table {}", failed.join(", "), table),
                        tags: self.alert_tags(),
                    };
                    self.alert_sender
                        .send(&alert)
                        .await
                        .external("sending alter column alert")?;
                    return Err(RouterError::Internal(format!(
                        "altering columns {} of table {}",
                        failed.join(", "),
                        table
                    )));
                }
            }
        }

        self.schema_handler
            .update_table_schema(table, updated)
            .await
            .wrap_err(format!("updating cached schema of table {}", table))?;
        self.refresh_warehouse_snapshot().await
    }
}
