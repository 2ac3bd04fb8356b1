//! Pipeline-stage metrics written alongside upload status changes.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::error::Result;

pub const BATCH_ROUTER_PU: &str = "batch_router";
pub const WAREHOUSE_PU: &str = "warehouse";

pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_ABORTED: &str = "aborted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub source_id: String,
    pub destination_id: String,
    pub source_job_id: Option<String>,
    pub source_job_run_id: Option<String>,
    pub source_task_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuDetails {
    pub in_pu: String,
    pub pu: String,
    pub terminal_pu: bool,
}

impl PuDetails {
    /// Batch router -> warehouse stage.
    pub fn warehouse(terminal: bool) -> Self {
        Self {
            in_pu: BATCH_ROUTER_PU.to_string(),
            pu: WAREHOUSE_PU.to_string(),
            terminal_pu: terminal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDetail {
    pub status: String,
    pub status_code: i32,
    pub count: i64,
    pub sample_event: Option<serde_json::Value>,
    pub sample_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedMetric {
    pub connection: ConnectionDetails,
    pub pu: PuDetails,
    pub status: StatusDetail,
}

/// Receives metrics inside the caller's transaction.
#[async_trait]
pub trait Reporting: Send + Sync {
    async fn report(&self, conn: &mut PgConnection, metrics: &[ReportedMetric]) -> Result<()>;
}

/// Appends metrics to `wh_reports`.
#[derive(Debug, Clone, Default)]
pub struct PgReporting;

#[async_trait]
impl Reporting for PgReporting {
    async fn report(&self, conn: &mut PgConnection, metrics: &[ReportedMetric]) -> Result<()> {
        for metric in metrics {
            sqlx::query(
                r#"
                INSERT INTO wh_reports (
                    source_id, destination_id, source_job_id, source_job_run_id,
                    source_task_run_id, in_pu, pu, terminal_pu, status, status_code,
                    count, sample_event, sample_response, reported_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(&metric.connection.source_id)
            .bind(&metric.connection.destination_id)
            .bind(&metric.connection.source_job_id)
            .bind(&metric.connection.source_job_run_id)
            .bind(&metric.connection.source_task_run_id)
            .bind(&metric.pu.in_pu)
            .bind(&metric.pu.pu)
            .bind(metric.pu.terminal_pu)
            .bind(&metric.status.status)
            .bind(metric.status.status_code)
            .bind(metric.status.count)
            .bind(&metric.status.sample_event)
            .bind(&metric.status.sample_response)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}
