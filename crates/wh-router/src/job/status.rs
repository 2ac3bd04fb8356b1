//! Status persistence, failure bookkeeping and abort handling.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::UploadJob;
use crate::alert::{Alert, Severity};
use crate::error::{Result, RouterError, WrapErr};
use crate::loader::JobErrorType;
use crate::model::warehouse::{to_provider_case, DISCARDS_TABLE};
use crate::repo::UploadField;
use crate::reporting::{
    ConnectionDetails, PuDetails, ReportedMetric, StatusDetail, STATUS_ABORTED, STATUS_FAILED,
    STATUS_SUCCEEDED,
};
use crate::state::UploadState;
use crate::stats::{UPLOAD_ABORTED, WAREHOUSE_FAILED_UPLOADS};

impl UploadJob {
    /// Appends a timing sample and persists the new status. Metrics, when
    /// given, are reported in the same transaction.
    pub(super) async fn set_upload_status(
        &mut self,
        state: UploadState,
        metrics: Vec<ReportedMetric>,
    ) -> Result<()> {
        self.set_upload_status_with(state, Vec::new(), metrics).await
    }

    /// Like [`Self::set_upload_status`], with `extra` columns written in the
    /// same update.
    async fn set_upload_status_with(
        &mut self,
        state: UploadState,
        extra: Vec<UploadField>,
        metrics: Vec<ReportedMetric>,
    ) -> Result<()> {
        debug!(status = %state, "Setting upload status");

        let mut timings = self
            .repos
            .uploads
            .upload_timings(self.upload.id)
            .await
            .wrap_err("reading upload timings")?;
        let now = (self.now)();
        timings.push(state, now);

        let mut fields = vec![
            UploadField::Status(state),
            UploadField::Timings(timings.clone()),
            UploadField::UpdatedAt(now),
        ];
        fields.extend(extra);
        let metrics = if self.config.reporting_enabled { metrics } else { Vec::new() };
        if metrics.is_empty() {
            self.repos.uploads.update(self.upload.id, &fields).await
        } else {
            self.repos
                .uploads
                .update_with_report(self.upload.id, &fields, &metrics)
                .await
        }
        .wrap_err(format!("setting status {} of upload {}", state, self.upload.id))?;

        self.upload.status = state;
        self.upload.timings = timings;
        Ok(())
    }

    /// Records `error` against `state` and decides whether the upload is
    /// aborted. Returns the status the upload was left in.
    pub(super) async fn set_upload_error(
        &mut self,
        error: &RouterError,
        state: UploadState,
    ) -> Result<UploadState> {
        let message = error.to_string();
        let error_type = self.loader.classify_error(&message);
        self.stats.count(&format!("error_{}", state), 1);

        self.set_upload_status(state, Vec::new()).await?;

        let now = (self.now)();
        let mut errors = self.upload.error.clone();
        let attempt = errors.record(state, message.clone());

        let mut final_state = state;
        if self
            .policy
            .is_aborted(attempt, self.upload.timings.first_attempt_at(), now)
        {
            final_state = UploadState::Aborted;
        }

        let attempts = self.upload.attempts + 1;
        let mut metadata = self.upload.metadata.clone();
        metadata.next_retry_time = Some(
            now + chrono::Duration::from_std(self.policy.duration_before_next_attempt(attempts))
                .unwrap_or_else(|_| chrono::Duration::zero()),
        );

        let sample_response = serde_json::to_string(&errors)?;
        let metrics = self
            .failure_metrics(final_state, sample_response)
            .await;
        let metrics = if self.config.reporting_enabled { metrics } else { Vec::new() };

        self.repos
            .uploads
            .update_with_report(
                self.upload.id,
                &[
                    UploadField::Status(final_state),
                    UploadField::Metadata(metadata.clone()),
                    UploadField::Error(errors.clone()),
                    UploadField::UpdatedAt(now),
                    UploadField::ErrorCategory(error_type.category().to_string()),
                    UploadField::Attempts(attempts),
                ],
                &metrics,
            )
            .await
            .wrap_err("changing upload columns")?;

        self.upload.status = final_state;
        self.upload.error = errors;
        self.upload.metadata = metadata;
        self.upload.attempts = attempts;
        self.upload.error_category = Some(error_type.category().to_string());
        self.stats.count(WAREHOUSE_FAILED_UPLOADS, 1);

        let creds_valid = if final_state == UploadState::Aborted {
            self.on_aborted(error_type, &message).await
        } else {
            None
        };

        warn!(
            status = %final_state,
            error = %message,
            priority = self.upload.priority,
            retried = self.upload.retried,
            attempt,
            error_mapping = %error_type,
            destination_creds_valid = ?creds_valid,
            "Upload error"
        );
        Ok(final_state)
    }

    /// Failure recording never masks the phase error; its own errors are logged.
    pub(super) async fn record_failure(&mut self, error: &RouterError, state: UploadState) {
        if let Err(e) = self.set_upload_error(error, state).await {
            warn!(error = %e, original = %error, "Failed to record upload error");
        }
    }

    /// Soft reset after schema drift: back to waiting with the error kept in
    /// the history. Attempts and the abort window are left alone.
    pub(super) async fn reset_to_waiting(&mut self, error: &RouterError) {
        if let Err(e) = self.try_reset_to_waiting(error).await {
            warn!(error = %e, original = %error, "Failed to reset upload to waiting");
        }
    }

    async fn try_reset_to_waiting(&mut self, error: &RouterError) -> Result<()> {
        let mut errors = self.upload.error.clone();
        errors.record(UploadState::Waiting, error.to_string());
        self.set_upload_status_with(
            UploadState::Waiting,
            vec![UploadField::Error(errors.clone())],
            Vec::new(),
        )
        .await?;
        self.upload.error = errors;
        Ok(())
    }

    /// Credential validation tags the abort so user misconfiguration can be
    /// told apart from platform failures. Returns the validation outcome.
    async fn on_aborted(&self, error_type: JobErrorType, message: &str) -> Option<bool> {
        let mut tags = vec![("error_mapping", error_type.as_str().to_string())];
        let creds_valid = match &self.destination_validator {
            Some(validator) => match validator.validate(&self.warehouse.destination).await {
                Ok(valid) => Some(valid),
                Err(e) => {
                    warn!(error = %e, "Failed to validate destination credentials");
                    None
                },
            },
            None => None,
        };
        if let Some(valid) = creds_valid {
            tags.push(("destination_creds_valid", valid.to_string()));
        }
        self.stats.count_with(UPLOAD_ABORTED, 1, &tags);

        let alert = Alert {
            resource: format!("upload:{}", self.upload.id),
            event: "upload_aborted".to_string(),
            severity: Severity::Critical,
            text: message.to_string(),
            tags: self.alert_tags(),
        };
        if let Err(e) = self.alert_sender.send(&alert).await {
            warn!(error = %e, "Failed to send upload aborted alert");
        }
        creds_valid
    }

    pub(super) fn alert_tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("workspace_id".to_string(), self.warehouse.workspace_id.clone()),
            ("destination_id".to_string(), self.warehouse.destination.id.clone()),
            (
                "destination_type".to_string(),
                self.warehouse.destination_type().to_string(),
            ),
            ("namespace".to_string(), self.warehouse.namespace.clone()),
        ])
    }

    fn connection_details(&self) -> ConnectionDetails {
        ConnectionDetails {
            source_id: self.upload.source_id.clone(),
            destination_id: self.upload.destination_id.clone(),
            source_job_id: self.upload.metadata.source_job_id.clone(),
            source_job_run_id: self.upload.metadata.source_job_run_id.clone(),
            source_task_run_id: self.upload.metadata.source_task_run_id.clone(),
        }
    }

    fn metric(&self, terminal: bool, status: &str, code: i32, count: i64, response: String)
        -> ReportedMetric {
        ReportedMetric {
            connection: self.connection_details(),
            pu: PuDetails::warehouse(terminal),
            status: StatusDetail {
                status: status.to_string(),
                status_code: code,
                count,
                sample_event: None,
                sample_response: response,
            },
        }
    }

    /// Success metric for the final transition: every staged event.
    pub(super) async fn exported_metrics(&self) -> Vec<ReportedMetric> {
        let count = self
            .repos
            .staging_files
            .total_events_for_upload_id(self.upload.id)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count staged events");
                0
            });
        vec![self.metric(true, STATUS_SUCCEEDED, 200, count, String::new())]
    }

    /// Failure metric for the events not exported yet, plus a success metric
    /// for those that were.
    async fn failure_metrics(&self, state: UploadState, response: String) -> Vec<ReportedMetric> {
        let input = self
            .repos
            .staging_files
            .total_events_for_upload_id(self.upload.id)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count staged events");
                0
            });
        let discards = to_provider_case(self.warehouse.destination_type(), DISCARDS_TABLE);
        let output = self
            .repos
            .table_uploads
            .total_exported_events(self.upload.id, &[discards])
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count exported events");
                0
            });

        let aborted = state == UploadState::Aborted;
        let status = if aborted { STATUS_ABORTED } else { STATUS_FAILED };
        let mut metrics = vec![self.metric(aborted, status, 400, input - output, response.clone())];
        if output > 0 {
            metrics.push(self.metric(aborted, STATUS_SUCCEEDED, 200, output, response));
        }
        metrics
    }
}

