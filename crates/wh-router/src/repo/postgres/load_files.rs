use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::error::{Result, RouterError};
use crate::model::LoadFile;
use crate::repo::LoadFilesRepo;

/// Rows per multi-value insert; keeps the bind count under the protocol limit.
const INSERT_BATCH_SIZE: usize = 1000;

pub struct PgLoadFiles {
    pool: PgPool,
}

impl PgLoadFiles {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn load_file_from_row(row: &PgRow) -> Result<LoadFile> {
    Ok(LoadFile {
        id: row.try_get("id")?,
        upload_id: row.try_get("upload_id")?,
        staging_file_id: row.try_get("staging_file_id")?,
        source_id: row.try_get("source_id")?,
        destination_id: row.try_get("destination_id")?,
        destination_type: row.try_get("destination_type")?,
        table_name: row.try_get("table_name")?,
        location: row.try_get("location")?,
        total_rows: row.try_get("total_rows")?,
        content_length: row.try_get("content_length")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LoadFilesRepo for PgLoadFiles {
    async fn insert(&self, files: &[LoadFile]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in files.chunks(INSERT_BATCH_SIZE) {
            let mut qb = QueryBuilder::new(
                "INSERT INTO wh_load_files (upload_id, staging_file_id, source_id, destination_id, \
                 destination_type, table_name, location, total_rows, content_length, metadata, \
                 created_at) ",
            );
            qb.push_values(chunk, |mut row, file| {
                row.push_bind(file.upload_id)
                    .push_bind(file.staging_file_id)
                    .push_bind(file.source_id.clone())
                    .push_bind(file.destination_id.clone())
                    .push_bind(file.destination_type.clone())
                    .push_bind(file.table_name.clone())
                    .push_bind(file.location.clone())
                    .push_bind(file.total_rows)
                    .push_bind(file.content_length)
                    .push_bind(file.metadata.clone())
                    .push_bind(file.created_at);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, upload_id: i64) -> Result<Vec<LoadFile>> {
        self.get_filtered(upload_id, None, None).await
    }

    async fn get_filtered(
        &self,
        upload_id: i64,
        table_name: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<LoadFile>> {
        let mut qb = QueryBuilder::new("SELECT * FROM wh_load_files WHERE upload_id = ");
        qb.push_bind(upload_id);
        if let Some(table) = table_name {
            qb.push(" AND table_name = ").push_bind(table.to_string());
        }
        qb.push(" ORDER BY id");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(load_file_from_row).collect()
    }

    async fn get_by_id(&self, id: i64) -> Result<LoadFile> {
        let row = sqlx::query("SELECT * FROM wh_load_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RouterError::NotFound(format!("load file {}", id)))?;
        load_file_from_row(&row)
    }

    async fn delete(&self, upload_id: i64, staging_file_ids: &[i64]) -> Result<()> {
        sqlx::query(
            "DELETE FROM wh_load_files WHERE upload_id = $1 OR staging_file_id = ANY($2)",
        )
        .bind(upload_id)
        .bind(staging_file_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn distinct_table_name(
        &self,
        source_id: &str,
        destination_id: &str,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar(
            r#"
            SELECT DISTINCT table_name FROM wh_load_files
            WHERE source_id = $1 AND destination_id = $2 AND id >= $3 AND id <= $4
            ORDER BY table_name
            "#,
        )
        .bind(source_id)
        .bind(destination_id)
        .bind(start_id)
        .bind(end_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    async fn total_rows_by_table(&self, upload_id: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT table_name, SUM(total_rows)::BIGINT AS total
            FROM wh_load_files
            WHERE upload_id = $1
            GROUP BY table_name
            ORDER BY table_name
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, i64)> {
                Ok((row.try_get("table_name")?, row.try_get("total")?))
            })
            .collect()
    }
}
