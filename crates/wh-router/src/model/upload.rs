use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schema::Schema;
use crate::state::UploadState;

pub const DEFAULT_UPLOAD_PRIORITY: i32 = 100;

/// One batch of staging files bound for a destination namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub workspace_id: String,
    pub namespace: String,
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: String,
    pub status: UploadState,
    pub upload_schema: Schema,
    pub timings: Timings,
    pub error: UploadErrors,
    pub metadata: UploadMetadata,
    pub error_category: Option<String>,
    pub attempts: i64,
    pub retried: bool,
    pub priority: i32,
    pub in_progress: bool,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_exec_at: Option<DateTime<Utc>>,
    pub load_file_start_id: Option<i64>,
    pub load_file_end_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn source_job_run_id(&self) -> Option<&str> {
        self.metadata.source_job_run_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn use_rudder_storage(&self) -> bool {
        self.metadata.use_rudder_storage
    }
}

/// Free-form upload metadata. Known keys are typed, the rest is carried
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_task_run_id: Option<String>,
    #[serde(default)]
    pub load_file_type: String,
    #[serde(default)]
    pub use_rudder_storage: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Ordered status samples, serialized as `[{"state": timestamp}, ...]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timings(Vec<BTreeMap<String, DateTime<Utc>>>);

impl Timings {
    pub fn push(&mut self, state: UploadState, at: DateTime<Utc>) {
        let mut sample = BTreeMap::new();
        sample.insert(state.as_str().to_string(), at);
        self.0.push(sample);
    }

    /// Time of the first recorded sample, across all states.
    pub fn first_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.0.first().and_then(|sample| sample.values().next().copied())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.0
            .iter()
            .flat_map(|sample| sample.iter().map(|(k, v)| (k.as_str(), *v)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateErrors {
    pub attempt: i64,
    pub errors: Vec<String>,
}

/// Error history keyed by state name. Failures accumulate, never overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadErrors(BTreeMap<String, StateErrors>);

impl UploadErrors {
    /// Appends `message` under `state` and returns the new attempt count.
    pub fn record(&mut self, state: UploadState, message: impl Into<String>) -> i64 {
        let entry = self.0.entry(state.as_str().to_string()).or_default();
        entry.attempt += 1;
        entry.errors.push(message.into());
        entry.attempt
    }

    pub fn get(&self, state: UploadState) -> Option<&StateErrors> {
        self.0.get(state.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_accumulation() {
        let mut errors = UploadErrors::default();
        assert_eq!(errors.record(UploadState::ExportingDataFailed, "e1"), 1);
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({"exporting_data_failed": {"attempt": 1, "errors": ["e1"]}})
        );

        assert_eq!(errors.record(UploadState::ExportingDataFailed, "e2"), 2);
        assert_eq!(errors.record(UploadState::GeneratingLoadFilesFailed, "e3"), 1);
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!({
                "exporting_data_failed": {"attempt": 2, "errors": ["e1", "e2"]},
                "generating_load_files_failed": {"attempt": 1, "errors": ["e3"]},
            })
        );
    }

    #[test]
    fn test_errors_read_legacy_blob() {
        let errors: UploadErrors = serde_json::from_value(json!({
            "internal_processing_failed": {"attempt": 3, "errors": ["a", "b", "c"]}
        }))
        .unwrap();
        let state = errors.get(UploadState::InternalProcessingFailed).unwrap();
        assert_eq!(state.attempt, 3);
        assert_eq!(state.errors.len(), 3);
    }

    #[test]
    fn test_timings_append_and_first_attempt() {
        let t0 = Utc::now() - chrono::Duration::hours(2);
        let mut timings = Timings::default();
        assert!(timings.first_attempt_at().is_none());

        timings.push(UploadState::GeneratingUploadSchema, t0);
        timings.push(UploadState::GeneratedUploadSchema, Utc::now());
        assert_eq!(timings.len(), 2);
        assert_eq!(timings.first_attempt_at(), Some(t0));

        let value = serde_json::to_value(&timings).unwrap();
        assert!(value.as_array().unwrap()[0]
            .get("generating_upload_schema")
            .is_some());
    }

    #[test]
    fn test_metadata_keeps_unknown_keys() {
        let raw = json!({
            "next_retry_time": "2024-01-01T00:00:00Z",
            "source_job_run_id": "run-1",
            "load_file_type": "csv",
            "merge": true
        });
        let metadata: UploadMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(metadata.source_job_run_id.as_deref(), Some("run-1"));
        assert_eq!(metadata.extra.get("merge"), Some(&json!(true)));

        let back = serde_json::to_value(&metadata).unwrap();
        assert_eq!(back.get("merge"), Some(&json!(true)));
    }
}
