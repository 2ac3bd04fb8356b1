use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::model::WhSchema;
use crate::repo::WhSchemaRepo;

pub struct PgWhSchemas {
    pool: PgPool,
}

impl PgWhSchemas {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WhSchemaRepo for PgWhSchemas {
    async fn get_for_namespace(
        &self,
        destination_id: &str,
        namespace: &str,
    ) -> Result<Option<WhSchema>> {
        let row = sqlx::query(
            "SELECT * FROM wh_schemas WHERE destination_id = $1 AND namespace = $2",
        )
        .bind(destination_id)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(WhSchema {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            destination_id: row.try_get("destination_id")?,
            namespace: row.try_get("namespace")?,
            schema: row.try_get::<Json<_>, _>("schema")?.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn insert(&self, schema: &WhSchema) -> Result<i64> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO wh_schemas (
                source_id, destination_id, namespace, schema, created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (destination_id, namespace) DO UPDATE SET
                source_id = EXCLUDED.source_id,
                schema = EXCLUDED.schema,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            RETURNING id
            "#,
        )
        .bind(&schema.source_id)
        .bind(&schema.destination_id)
        .bind(&schema.namespace)
        .bind(Json(&schema.schema))
        .bind(schema.created_at)
        .bind(schema.updated_at)
        .bind(schema.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn set_expiry_for_destination(
        &self,
        destination_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE wh_schemas SET expires_at = $1, updated_at = $2 WHERE destination_id = $3")
            .bind(expires_at)
            .bind(Utc::now())
            .bind(destination_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
