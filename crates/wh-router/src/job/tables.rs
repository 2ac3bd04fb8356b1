//! Table-skip bookkeeping across uploads of the same namespace.

use std::collections::HashMap;

use tracing::{debug, info};

use super::UploadJob;
use crate::error::{Result, RouterError};
use crate::model::{PendingTableUpload, TableUploadStatus};

/// Tables an export must not touch.
///
/// `previously_failed` holds tables that failed in an earlier upload still
/// pending on the same namespace, only populated when skipping is enabled.
/// `succeeded` holds tables already exported by this upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablesToSkip {
    pub previously_failed: HashMap<String, PendingTableUpload>,
    pub succeeded: HashMap<String, PendingTableUpload>,
}

impl TablesToSkip {
    pub fn partition(
        pending: Vec<PendingTableUpload>,
        upload_id: i64,
        skip_previously_failed: bool,
    ) -> Self {
        let mut skip = Self::default();
        for table_upload in pending {
            if table_upload.upload_id != upload_id {
                if skip_previously_failed
                    && table_upload.status.is_failed()
                    && table_upload.has_error()
                {
                    skip.previously_failed
                        .insert(table_upload.table_name.clone(), table_upload);
                }
            } else if table_upload.status == TableUploadStatus::ExportedData {
                skip.succeeded
                    .insert(table_upload.table_name.clone(), table_upload);
            }
        }
        skip
    }

    pub fn contains(&self, table: &str) -> bool {
        self.previously_failed.contains_key(table) || self.succeeded.contains_key(table)
    }
}

impl UploadJob {
    /// Computed at most once per job. A failed lookup is remembered too, so
    /// every caller sees the same error.
    pub async fn tables_to_skip(&self) -> Result<TablesToSkip> {
        let cached = self
            .tables_to_skip
            .get_or_init(|| async {
                let upload = &self.upload;
                debug!("Fetching pending table uploads");
                self.repos
                    .pending_table_uploads
                    .pending_table_uploads(
                        &upload.destination_id,
                        &upload.namespace,
                        upload.priority,
                        upload.first_event_at,
                        upload.id,
                    )
                    .await
                    .map(|pending| {
                        let skip = TablesToSkip::partition(
                            pending,
                            upload.id,
                            self.config.skip_previously_failed_tables,
                        );
                        if !skip.previously_failed.is_empty() {
                            info!(
                                tables = ?skip.previously_failed.keys().collect::<Vec<_>>(),
                                "Skipping tables that failed in earlier uploads"
                            );
                        }
                        skip
                    })
                    .map_err(|e| e.to_string())
            })
            .await;

        cached
            .clone()
            .map_err(|e| RouterError::Internal(format!("pending table uploads: {}", e)))
    }

    /// Whether loads may append instead of merging. Replays, retries and
    /// sources that re-send history always merge.
    pub fn can_append(&self) -> bool {
        if self.upload.source_job_run_id().is_some() {
            return false;
        }
        if self.warehouse.source.is_replay_source() {
            return false;
        }
        if matches!(
            self.warehouse.source.category.as_str(),
            "cloud" | "singer-protocol"
        ) {
            return false;
        }
        !self.upload.retried
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn pending(upload_id: i64, table: &str, status: TableUploadStatus, error: Option<&str>)
        -> PendingTableUpload {
        PendingTableUpload {
            upload_id,
            destination_id: "dest-id".into(),
            namespace: "namespace".into(),
            table_name: table.into(),
            status,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_partition_previously_failed_needs_flag() {
        let rows = vec![pending(1, "tracks", TableUploadStatus::ExportingDataFailed, Some("boom"))];

        let skip = TablesToSkip::partition(rows.clone(), 5, false);
        assert!(skip.previously_failed.is_empty());

        let skip = TablesToSkip::partition(rows, 5, true);
        assert!(skip.contains("tracks"));
        assert!(skip.succeeded.is_empty());
    }

    #[test]
    fn test_partition_ignores_failures_without_error() {
        let rows = vec![
            pending(1, "a", TableUploadStatus::UpdatingSchemaFailed, None),
            pending(1, "b", TableUploadStatus::ExportingDataFailed, Some("")),
            pending(1, "c", TableUploadStatus::ExportingData, Some("boom")),
        ];
        let skip = TablesToSkip::partition(rows, 5, true);
        assert_eq!(skip, TablesToSkip::default());
    }

    #[test]
    fn test_partition_succeeded_only_for_current_upload() {
        let rows = vec![
            pending(5, "pages", TableUploadStatus::ExportedData, None),
            pending(5, "tracks", TableUploadStatus::ExportingDataFailed, Some("boom")),
            pending(1, "screens", TableUploadStatus::ExportedData, None),
        ];
        let skip = TablesToSkip::partition(rows, 5, true);
        assert_eq!(skip.succeeded.keys().collect::<Vec<_>>(), vec!["pages"]);
        assert!(skip.previously_failed.is_empty());
        assert!(!skip.contains("screens"));
    }
}
