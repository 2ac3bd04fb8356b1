use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::model::{EventTimeRange, StagingFile};
use crate::repo::StagingFilesRepo;

pub struct PgStagingFiles {
    pool: PgPool,
}

impl PgStagingFiles {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn staging_file_from_row(row: &PgRow) -> Result<StagingFile> {
    Ok(StagingFile {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        workspace_id: row.try_get("workspace_id")?,
        source_id: row.try_get("source_id")?,
        destination_id: row.try_get("destination_id")?,
        location: row.try_get("location")?,
        schema: row.try_get::<Json<_>, _>("schema")?.0,
        total_events: row.try_get("total_events")?,
        total_bytes: row.try_get("total_bytes")?,
        first_event_at: row.try_get("first_event_at")?,
        last_event_at: row.try_get("last_event_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl StagingFilesRepo for PgStagingFiles {
    async fn insert(&self, file: &StagingFile) -> Result<i64> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO wh_staging_files (
                upload_id, workspace_id, source_id, destination_id, location, schema,
                total_events, total_bytes, first_event_at, last_event_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(file.upload_id)
        .bind(&file.workspace_id)
        .bind(&file.source_id)
        .bind(&file.destination_id)
        .bind(&file.location)
        .bind(Json(&file.schema))
        .bind(file.total_events)
        .bind(file.total_bytes)
        .bind(file.first_event_at)
        .bind(file.last_event_at)
        .bind(file.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_for_upload_id(&self, upload_id: i64) -> Result<Vec<StagingFile>> {
        let rows = sqlx::query("SELECT * FROM wh_staging_files WHERE upload_id = $1 ORDER BY id")
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(staging_file_from_row).collect()
    }

    async fn total_events_for_upload_id(&self, upload_id: i64) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(total_events)::BIGINT FROM wh_staging_files WHERE upload_id = $1",
        )
        .bind(upload_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }

    async fn event_time_ranges_by_upload_id(&self, upload_id: i64) -> Result<Vec<EventTimeRange>> {
        let rows = sqlx::query(
            r#"
            SELECT first_event_at, last_event_at FROM wh_staging_files
            WHERE upload_id = $1
              AND first_event_at IS NOT NULL
              AND last_event_at IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<_> {
                Ok(EventTimeRange {
                    first_event_at: row.try_get("first_event_at")?,
                    last_event_at: row.try_get("last_event_at")?,
                })
            })
            .collect()
    }
}
