use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::error::{Result, RouterError};
use crate::model::{TableUpload, TableUploadStatus, TableUploadUpdate};
use crate::repo::TableUploadsRepo;

pub struct PgTableUploads {
    pool: PgPool,
}

impl PgTableUploads {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn table_upload_from_row(row: &PgRow) -> Result<TableUpload> {
    let status: String = row.try_get("status")?;
    Ok(TableUpload {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        table_name: row.try_get("table_name")?,
        status: TableUploadStatus::from(status),
        error: row.try_get("error")?,
        total_events: row.try_get("total_events")?,
        location: row.try_get("location")?,
        last_exec_time: row.try_get("last_exec_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TableUploadsRepo for PgTableUploads {
    async fn insert(&self, upload_id: i64, table_names: &[String]) -> Result<()> {
        if table_names.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut qb = QueryBuilder::new(
            "INSERT INTO wh_table_uploads (upload_id, table_name, status, created_at, updated_at) ",
        );
        qb.push_values(table_names, |mut row, table| {
            row.push_bind(upload_id)
                .push_bind(table.clone())
                .push_bind(TableUploadStatus::Waiting.as_str())
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" ON CONFLICT (upload_id, table_name) DO NOTHING");
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn get_by_upload_id(&self, upload_id: i64) -> Result<Vec<TableUpload>> {
        let rows = sqlx::query("SELECT * FROM wh_table_uploads WHERE upload_id = $1 ORDER BY id")
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(table_upload_from_row).collect()
    }

    async fn get_by_upload_id_and_table_name(
        &self,
        upload_id: i64,
        table_name: &str,
    ) -> Result<TableUpload> {
        let row = sqlx::query(
            "SELECT * FROM wh_table_uploads WHERE upload_id = $1 AND table_name = $2",
        )
        .bind(upload_id)
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RouterError::NotFound(format!("table upload {} of upload {}", table_name, upload_id))
        })?;
        table_upload_from_row(&row)
    }

    async fn update(
        &self,
        upload_id: i64,
        table_name: &str,
        update: &TableUploadUpdate,
    ) -> Result<()> {
        let mut qb = QueryBuilder::new("UPDATE wh_table_uploads SET updated_at = ");
        qb.push_bind(Utc::now());
        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(error) = &update.error {
            qb.push(", error = ").push_bind(error.clone());
        }
        if let Some(total_events) = update.total_events {
            qb.push(", total_events = ").push_bind(total_events);
        }
        if let Some(location) = &update.location {
            qb.push(", location = ").push_bind(location.clone());
        }
        if let Some(at) = update.last_exec_time {
            qb.push(", last_exec_time = ").push_bind(at);
        }
        qb.push(" WHERE upload_id = ").push_bind(upload_id);
        qb.push(" AND table_name = ").push_bind(table_name.to_string());

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn total_exported_events(&self, upload_id: i64, skip_tables: &[String]) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(total_events)::BIGINT FROM wh_table_uploads
            WHERE upload_id = $1
              AND status = $2
              AND NOT (table_name = ANY($3))
            "#,
        )
        .bind(upload_id)
        .bind(TableUploadStatus::ExportedData.as_str())
        .bind(skip_tables)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0))
    }
}
