use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schema::Schema;

/// Raw events landed in object storage by the ingestion pipeline. Read only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingFile {
    pub id: i64,
    pub upload_id: Option<i64>,
    pub workspace_id: String,
    pub source_id: String,
    pub destination_id: String,
    pub location: String,
    pub schema: Schema,
    pub total_events: i64,
    pub total_bytes: i64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTimeRange {
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
}

pub fn staging_file_ids(files: &[StagingFile]) -> Vec<i64> {
    files.iter().map(|f| f.id).collect()
}
