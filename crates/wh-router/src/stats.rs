//! Upload job metrics
//!
//! Every series is tagged with the upload's workspace, source, destination
//! and namespace so dashboards can slice by connection.

use std::time::Duration;

use metrics::{counter, gauge, histogram, Label};

use crate::model::{Upload, Warehouse};

pub const UPLOAD_TIME: &str = "upload_time";
pub const TOTAL_ROWS_SYNCED: &str = "total_rows_synced";
pub const NUM_STAGED_EVENTS: &str = "num_staged_events";
pub const UPLOAD_SUCCESS: &str = "upload_success";
pub const WAREHOUSE_FAILED_UPLOADS: &str = "warehouse_failed_uploads";
pub const UPLOAD_ABORTED: &str = "upload_aborted";
pub const OBJECTS_DELETED_COUNT: &str = "objects_deleted_count";
pub const OBJECTS_DELETION_TIME: &str = "objects_deletion_time";
pub const LONG_RUNNING_UPLOAD: &str = "long_running_upload";
pub const CONSOLIDATED_SCHEMA_SIZE: &str = "consolidated_schema_size";

/// Label set of one upload job.
#[derive(Debug, Clone, Default)]
pub struct JobStats {
    labels: Vec<(&'static str, String)>,
}

impl JobStats {
    pub fn new(warehouse: &Warehouse, upload: &Upload) -> Self {
        Self {
            labels: vec![
                ("module", "warehouse".to_string()),
                ("workspace_id", warehouse.workspace_id.clone()),
                ("destination_type", warehouse.destination_type().to_string()),
                ("destination_id", warehouse.destination.id.clone()),
                ("source_id", warehouse.source.id.clone()),
                ("source_category", warehouse.source.category.clone()),
                ("namespace", warehouse.namespace.clone()),
                ("priority", upload.priority.to_string()),
            ],
        }
    }

    fn labels_with(&self, extra: &[(&'static str, String)]) -> Vec<Label> {
        self.labels
            .iter()
            .chain(extra.iter())
            .map(|(k, v)| Label::new(*k, v.clone()))
            .collect()
    }

    pub fn count(&self, name: &str, value: u64) {
        self.count_with(name, value, &[]);
    }

    pub fn count_with(&self, name: &str, value: u64, extra: &[(&'static str, String)]) {
        counter!(name.to_string(), self.labels_with(extra)).increment(value);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        gauge!(name.to_string(), self.labels_with(&[])).set(value);
    }

    pub fn timing(&self, name: &str, elapsed: Duration) {
        histogram!(name.to_string(), self.labels_with(&[])).record(elapsed.as_secs_f64());
    }

    pub fn histogram(&self, name: &str, value: f64) {
        histogram!(name.to_string(), self.labels_with(&[])).record(value);
    }

    /// Per-table rows counter.
    pub fn rows_synced(&self, table: &str, rows: i64) {
        self.count_with(
            TOTAL_ROWS_SYNCED,
            rows.max(0) as u64,
            &[("table_name", table.to_string())],
        );
    }
}
