//! Upload state machine.
//!
//! The pipeline is a fixed sequence of phases. Each phase owns an
//! in-progress, completed and failed state; the persisted status alone
//! decides where a job resumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Waiting,
    GeneratingUploadSchema,
    GeneratedUploadSchema,
    GeneratingUploadSchemaFailed,
    CreatingTableUploads,
    CreatedTableUploads,
    CreatingTableUploadsFailed,
    GeneratingLoadFiles,
    GeneratedLoadFiles,
    GeneratingLoadFilesFailed,
    UpdatingTableUploadsCounts,
    UpdatedTableUploadsCounts,
    UpdatingTableUploadsCountsFailed,
    CreatingRemoteSchema,
    CreatedRemoteSchema,
    CreatingRemoteSchemaFailed,
    ExportingData,
    ExportedData,
    ExportingDataFailed,
    Aborted,
    InternalProcessingFailed,
}

impl UploadState {
    pub const ALL: [UploadState; 21] = [
        UploadState::Waiting,
        UploadState::GeneratingUploadSchema,
        UploadState::GeneratedUploadSchema,
        UploadState::GeneratingUploadSchemaFailed,
        UploadState::CreatingTableUploads,
        UploadState::CreatedTableUploads,
        UploadState::CreatingTableUploadsFailed,
        UploadState::GeneratingLoadFiles,
        UploadState::GeneratedLoadFiles,
        UploadState::GeneratingLoadFilesFailed,
        UploadState::UpdatingTableUploadsCounts,
        UploadState::UpdatedTableUploadsCounts,
        UploadState::UpdatingTableUploadsCountsFailed,
        UploadState::CreatingRemoteSchema,
        UploadState::CreatedRemoteSchema,
        UploadState::CreatingRemoteSchemaFailed,
        UploadState::ExportingData,
        UploadState::ExportedData,
        UploadState::ExportingDataFailed,
        UploadState::Aborted,
        UploadState::InternalProcessingFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Waiting => "waiting",
            UploadState::GeneratingUploadSchema => "generating_upload_schema",
            UploadState::GeneratedUploadSchema => "generated_upload_schema",
            UploadState::GeneratingUploadSchemaFailed => "generating_upload_schema_failed",
            UploadState::CreatingTableUploads => "creating_table_uploads",
            UploadState::CreatedTableUploads => "created_table_uploads",
            UploadState::CreatingTableUploadsFailed => "creating_table_uploads_failed",
            UploadState::GeneratingLoadFiles => "generating_load_files",
            UploadState::GeneratedLoadFiles => "generated_load_files",
            UploadState::GeneratingLoadFilesFailed => "generating_load_files_failed",
            UploadState::UpdatingTableUploadsCounts => "updating_table_uploads_counts",
            UploadState::UpdatedTableUploadsCounts => "updated_table_uploads_counts",
            UploadState::UpdatingTableUploadsCountsFailed => "updating_table_uploads_counts_failed",
            UploadState::CreatingRemoteSchema => "creating_remote_schema",
            UploadState::CreatedRemoteSchema => "created_remote_schema",
            UploadState::CreatingRemoteSchemaFailed => "creating_remote_schema_failed",
            UploadState::ExportingData => "exporting_data",
            UploadState::ExportedData => "exported_data",
            UploadState::ExportingDataFailed => "exporting_data_failed",
            UploadState::Aborted => "aborted",
            UploadState::InternalProcessingFailed => "internal_processing_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.as_str() == s)
    }

    /// Exported and aborted uploads never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::ExportedData | UploadState::Aborted)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown or empty status strings resume from the start.
impl From<String> for UploadState {
    fn from(s: String) -> Self {
        UploadState::parse(&s).unwrap_or(UploadState::Waiting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GenerateUploadSchema,
    CreateTableUploads,
    GenerateLoadFiles,
    UpdateTableUploadsCounts,
    CreateRemoteSchema,
    ExportData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub phase: Phase,
    pub in_progress: UploadState,
    pub completed: UploadState,
    pub failed: UploadState,
}

pub const TRANSITIONS: [StateTransition; 6] = [
    StateTransition {
        phase: Phase::GenerateUploadSchema,
        in_progress: UploadState::GeneratingUploadSchema,
        completed: UploadState::GeneratedUploadSchema,
        failed: UploadState::GeneratingUploadSchemaFailed,
    },
    StateTransition {
        phase: Phase::CreateTableUploads,
        in_progress: UploadState::CreatingTableUploads,
        completed: UploadState::CreatedTableUploads,
        failed: UploadState::CreatingTableUploadsFailed,
    },
    StateTransition {
        phase: Phase::GenerateLoadFiles,
        in_progress: UploadState::GeneratingLoadFiles,
        completed: UploadState::GeneratedLoadFiles,
        failed: UploadState::GeneratingLoadFilesFailed,
    },
    StateTransition {
        phase: Phase::UpdateTableUploadsCounts,
        in_progress: UploadState::UpdatingTableUploadsCounts,
        completed: UploadState::UpdatedTableUploadsCounts,
        failed: UploadState::UpdatingTableUploadsCountsFailed,
    },
    StateTransition {
        phase: Phase::CreateRemoteSchema,
        in_progress: UploadState::CreatingRemoteSchema,
        completed: UploadState::CreatedRemoteSchema,
        failed: UploadState::CreatingRemoteSchemaFailed,
    },
    StateTransition {
        phase: Phase::ExportData,
        in_progress: UploadState::ExportingData,
        completed: UploadState::ExportedData,
        failed: UploadState::ExportingDataFailed,
    },
];

/// Resolves the transition to execute for a persisted status.
///
/// A completed state advances to the following phase, an in-progress or
/// failed state retries its own phase. Anything else (waiting, internal
/// processing failures) starts over. Returns `None` once the pipeline is
/// done or aborted.
pub fn next_transition(current: UploadState) -> Option<&'static StateTransition> {
    if current.is_terminal() {
        return None;
    }
    for (idx, transition) in TRANSITIONS.iter().enumerate() {
        if current == transition.in_progress || current == transition.failed {
            return Some(transition);
        }
        if current == transition.completed {
            return TRANSITIONS.get(idx + 1);
        }
    }
    TRANSITIONS.first()
}
