use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Warehouse-ready artifact for one table of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFile {
    pub id: i64,
    pub upload_id: i64,
    pub staging_file_id: i64,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: String,
    pub table_name: String,
    pub location: String,
    pub total_rows: i64,
    pub content_length: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Id range of the load files produced for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFileRange {
    pub start_id: i64,
    pub end_id: i64,
}
