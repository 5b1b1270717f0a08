use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, TagParams, TagsRepo, TagsWriteRepo};
use crate::domain::entities::TagRecord;
use crate::domain::types::TagId;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TagRow {
    id: i32,
    name: String,
    color: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            color: row.color,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl TagsRepo for PostgresRepositories {
    async fn find_by_ids(&self, ids: &[TagId]) -> Result<Vec<TagRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name, color, created_at, updated_at
            FROM tags
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagRecord::from).collect())
    }

    async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT id, name, color, created_at, updated_at
            FROM tags
            ORDER BY LOWER(name), id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagRecord::from).collect())
    }
}

#[async_trait]
impl TagsWriteRepo for PostgresRepositories {
    async fn create_tag(&self, params: TagParams) -> Result<TagRecord, RepoError> {
        let TagParams { name, color } = params;
        let now = OffsetDateTime::now_utc();

        let row = sqlx::query_as::<_, TagRow>(
            r#"
            INSERT INTO tags (name, color, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, name, color, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(color)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(TagRecord::from(row))
    }

    async fn update_tag(&self, id: TagId, params: TagParams) -> Result<TagRecord, RepoError> {
        let TagParams { name, color } = params;

        let row = sqlx::query_as::<_, TagRow>(
            r#"
            UPDATE tags
            SET name = $2, color = $3, updated_at = $4
            WHERE id = $1
            RETURNING id, name, color, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(color)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(TagRecord::from(row))
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
