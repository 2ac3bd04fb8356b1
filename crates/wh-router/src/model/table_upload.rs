use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableUploadStatus {
    Waiting,
    Executing,
    UpdatingSchema,
    UpdatingSchemaFailed,
    UpdatedSchema,
    ExportingData,
    ExportingDataFailed,
    ExportedData,
}

impl TableUploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableUploadStatus::Waiting => "waiting",
            TableUploadStatus::Executing => "executing",
            TableUploadStatus::UpdatingSchema => "updating_schema",
            TableUploadStatus::UpdatingSchemaFailed => "updating_schema_failed",
            TableUploadStatus::UpdatedSchema => "updated_schema",
            TableUploadStatus::ExportingData => "exporting_data",
            TableUploadStatus::ExportingDataFailed => "exporting_data_failed",
            TableUploadStatus::ExportedData => "exported_data",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            TableUploadStatus::UpdatingSchemaFailed | TableUploadStatus::ExportingDataFailed
        )
    }
}

impl From<String> for TableUploadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "executing" => TableUploadStatus::Executing,
            "updating_schema" => TableUploadStatus::UpdatingSchema,
            "updating_schema_failed" => TableUploadStatus::UpdatingSchemaFailed,
            "updated_schema" => TableUploadStatus::UpdatedSchema,
            "exporting_data" => TableUploadStatus::ExportingData,
            "exporting_data_failed" => TableUploadStatus::ExportingDataFailed,
            "exported_data" => TableUploadStatus::ExportedData,
            _ => TableUploadStatus::Waiting,
        }
    }
}

impl std::fmt::Display for TableUploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-table progress inside an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableUpload {
    pub id: i64,
    pub upload_id: i64,
    pub table_name: String,
    pub status: TableUploadStatus,
    pub error: Option<String>,
    pub total_events: i64,
    pub location: Option<String>,
    pub last_exec_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a table upload; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUploadUpdate {
    pub status: Option<TableUploadStatus>,
    pub error: Option<String>,
    pub total_events: Option<i64>,
    pub location: Option<String>,
    pub last_exec_time: Option<DateTime<Utc>>,
}

impl TableUploadUpdate {
    pub fn status(status: TableUploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(status: TableUploadStatus, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Table upload of a non-terminal upload on the same destination namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTableUpload {
    pub upload_id: i64,
    pub destination_id: String,
    pub namespace: String,
    pub table_name: String,
    pub status: TableUploadStatus,
    pub error: Option<String>,
}

impl PendingTableUpload {
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}
