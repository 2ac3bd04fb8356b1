use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::error::{Result, RouterError};
use crate::model::{PendingTableUpload, Timings, TableUploadStatus, Upload};
use crate::repo::{NewUpload, PendingTableUploadsRepo, UploadField, UploadsRepo};
use crate::reporting::{ReportedMetric, Reporting};
use crate::state::UploadState;

pub struct PgUploads {
    pool: PgPool,
    reporting: Arc<dyn Reporting>,
}

impl PgUploads {
    pub fn new(pool: PgPool, reporting: Arc<dyn Reporting>) -> Self {
        Self { pool, reporting }
    }
}

fn upload_from_row(row: &PgRow) -> Result<Upload> {
    let status: String = row.try_get("status")?;
    Ok(Upload {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        namespace: row.try_get("namespace")?,
        source_id: row.try_get("source_id")?,
        destination_id: row.try_get("destination_id")?,
        destination_type: row.try_get("destination_type")?,
        status: UploadState::from(status),
        upload_schema: row.try_get::<Json<_>, _>("upload_schema")?.0,
        timings: row.try_get::<Json<_>, _>("timings")?.0,
        error: row.try_get::<Json<_>, _>("error")?.0,
        metadata: row.try_get::<Json<_>, _>("metadata")?.0,
        error_category: row.try_get("error_category")?,
        attempts: row.try_get("attempts")?,
        retried: row.try_get("retried")?,
        priority: row.try_get("priority")?,
        in_progress: row.try_get("in_progress")?,
        first_event_at: row.try_get("first_event_at")?,
        last_event_at: row.try_get("last_event_at")?,
        last_exec_at: row.try_get("last_exec_at")?,
        load_file_start_id: row.try_get("load_file_start_id")?,
        load_file_end_id: row.try_get("load_file_end_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// `UPDATE wh_uploads SET ... WHERE id = $n`, or `None` for an empty field list.
fn build_update(id: i64, fields: &[UploadField]) -> Option<QueryBuilder<'static, Postgres>> {
    if fields.is_empty() {
        return None;
    }

    let mut qb = QueryBuilder::new("UPDATE wh_uploads SET ");
    {
        let mut set = qb.separated(", ");
        for field in fields {
            set.push(format!("{} = ", field.column()));
            match field {
                UploadField::Status(state) => set.push_bind_unseparated(state.as_str()),
                UploadField::Timings(t) => set.push_bind_unseparated(Json(t.clone())),
                UploadField::Metadata(m) => set.push_bind_unseparated(Json(m.clone())),
                UploadField::Error(e) => set.push_bind_unseparated(Json(e.clone())),
                UploadField::ErrorCategory(c) => set.push_bind_unseparated(c.clone()),
                UploadField::UpdatedAt(at) | UploadField::LastExecAt(at) => {
                    set.push_bind_unseparated(*at)
                },
                UploadField::InProgress(b) => set.push_bind_unseparated(*b),
                UploadField::Schema(s) => set.push_bind_unseparated(Json(s.clone())),
                UploadField::Attempts(n)
                | UploadField::LoadFileStartId(n)
                | UploadField::LoadFileEndId(n) => set.push_bind_unseparated(*n),
            };
        }
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    Some(qb)
}

#[async_trait]
impl UploadsRepo for PgUploads {
    async fn insert(&self, upload: &NewUpload, staging_file_ids: &[i64]) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO wh_uploads (
                workspace_id, namespace, source_id, destination_id, destination_type,
                status, priority, metadata, first_event_at, last_event_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&upload.workspace_id)
        .bind(&upload.namespace)
        .bind(&upload.source_id)
        .bind(&upload.destination_id)
        .bind(&upload.destination_type)
        .bind(UploadState::Waiting.as_str())
        .bind(upload.priority)
        .bind(Json(&upload.metadata))
        .bind(upload.first_event_at)
        .bind(upload.last_event_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE wh_staging_files SET upload_id = $1 WHERE id = ANY($2)")
            .bind(id)
            .bind(staging_file_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Upload> {
        let row = sqlx::query("SELECT * FROM wh_uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RouterError::NotFound(format!("upload {}", id)))?;
        upload_from_row(&row)
    }

    async fn update(&self, id: i64, fields: &[UploadField]) -> Result<()> {
        if let Some(mut qb) = build_update(id, fields) {
            qb.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn update_with_report(
        &self,
        id: i64,
        fields: &[UploadField],
        metrics: &[ReportedMetric],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(mut qb) = build_update(id, fields) {
            qb.build().execute(&mut *tx).await?;
        }
        if !metrics.is_empty() {
            self.reporting.report(&mut *tx, metrics).await?;
        }

        tx.commit().await?;
        debug!(upload_id = id, metrics = metrics.len(), "Committed upload update with report");
        Ok(())
    }

    async fn upload_timings(&self, id: i64) -> Result<Timings> {
        let timings: Option<Json<Timings>> =
            sqlx::query_scalar("SELECT timings FROM wh_uploads WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        timings
            .map(|t| t.0)
            .ok_or_else(|| RouterError::NotFound(format!("upload {}", id)))
    }

    async fn due_uploads(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Upload>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM wh_uploads
            WHERE status NOT IN ($1, $2)
              AND NOT in_progress
              AND (
                metadata->>'next_retry_time' IS NULL
                OR (metadata->>'next_retry_time')::timestamptz <= $3
              )
            ORDER BY priority ASC, first_event_at ASC NULLS LAST, id ASC
            LIMIT $4
            "#,
        )
        .bind(UploadState::ExportedData.as_str())
        .bind(UploadState::Aborted.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(upload_from_row).collect()
    }

    async fn reset_in_progress(&self, destination_type: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE wh_uploads
            SET in_progress = FALSE
            WHERE in_progress
              AND ($1::text IS NULL OR destination_type = $1)
            "#,
        )
        .bind(destination_type)
        .execute(&self.pool)
        .await?;

        debug!(reset = result.rows_affected(), ?destination_type, "Reset in-progress uploads");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PendingTableUploadsRepo for PgUploads {
    async fn pending_table_uploads(
        &self,
        destination_id: &str,
        namespace: &str,
        priority: i32,
        first_event_at: Option<DateTime<Utc>>,
        upload_id: i64,
    ) -> Result<Vec<PendingTableUpload>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id AS upload_id, u.destination_id, u.namespace,
                   tu.table_name, tu.status, tu.error
            FROM wh_uploads u
            JOIN wh_table_uploads tu ON tu.upload_id = u.id
            WHERE u.destination_id = $1
              AND u.namespace = $2
              AND u.status NOT IN ($3, $4)
              AND (
                u.id = $7
                OR u.priority < $5
                OR (u.priority = $5 AND u.first_event_at <= $6)
              )
            ORDER BY u.priority ASC, u.first_event_at ASC, u.id ASC
            "#,
        )
        .bind(destination_id)
        .bind(namespace)
        .bind(UploadState::ExportedData.as_str())
        .bind(UploadState::Aborted.as_str())
        .bind(priority)
        .bind(first_event_at)
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<_> {
                let status: String = row.try_get("status")?;
                Ok(PendingTableUpload {
                    upload_id: row.try_get("upload_id")?,
                    destination_id: row.try_get("destination_id")?,
                    namespace: row.try_get("namespace")?,
                    table_name: row.try_get("table_name")?,
                    status: TableUploadStatus::from(status),
                    error: row.try_get("error")?,
                })
            })
            .collect()
    }
}
