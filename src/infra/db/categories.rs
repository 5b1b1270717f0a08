use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::application::repos::{
    CategoriesRepo, CategoriesWriteRepo, CategoryParams, CategoryQueryFilter, RepoError,
};
use crate::domain::entities::CategoryRecord;
use crate::domain::types::CategoryId;

use super::{PostgresRepositories, map_sqlx_error};

const CATEGORY_COLUMNS: &str = "id, name, description, icon, theme, parent_id, sort_order, \
    is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: i32,
    name: String,
    description: Option<String>,
    icon: Option<String>,
    theme: Option<String>,
    parent_id: Option<i32>,
    sort_order: Option<i32>,
    is_active: Option<bool>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CategoryRow> for CategoryRecord {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            icon: row.icon,
            theme: row.theme,
            parent_id: row.parent_id,
            sort_order: row.sort_order,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl CategoriesRepo for PostgresRepositories {
    async fn find_by_ids(&self, ids: &[CategoryId]) -> Result<Vec<CategoryRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CategoryRecord::from).collect())
    }

    async fn list_categories(
        &self,
        filter: CategoryQueryFilter,
    ) -> Result<Vec<CategoryRecord>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {CATEGORY_COLUMNS} FROM categories"));
        if filter.active_only {
            qb.push(" WHERE is_active IS DISTINCT FROM FALSE");
        }
        qb.push(" ORDER BY COALESCE(sort_order, 0), id");

        let rows = qb
            .build_query_as::<CategoryRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CategoryRecord::from).collect())
    }
}

#[async_trait]
impl CategoriesWriteRepo for PostgresRepositories {
    async fn create_category(&self, params: CategoryParams) -> Result<CategoryRecord, RepoError> {
        let CategoryParams {
            name,
            description,
            icon,
            theme,
            parent_id,
            sort_order,
            is_active,
        } = params;

        let now = OffsetDateTime::now_utc();
        let sql = format!(
            "INSERT INTO categories \
                (name, description, icon, theme, parent_id, sort_order, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING {CATEGORY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(name)
            .bind(description)
            .bind(icon)
            .bind(theme)
            .bind(parent_id)
            .bind(sort_order)
            .bind(is_active)
            .bind(now)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CategoryRecord::from(row))
    }

    async fn update_category(
        &self,
        id: CategoryId,
        params: CategoryParams,
    ) -> Result<CategoryRecord, RepoError> {
        let CategoryParams {
            name,
            description,
            icon,
            theme,
            parent_id,
            sort_order,
            is_active,
        } = params;

        let sql = format!(
            "UPDATE categories \
             SET name = $2, description = $3, icon = $4, theme = $5, parent_id = $6, \
                 sort_order = $7, is_active = $8, updated_at = $9 \
             WHERE id = $1 \
             RETURNING {CATEGORY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(id)
            .bind(name)
            .bind(description)
            .bind(icon)
            .bind(theme)
            .bind(parent_id)
            .bind(sort_order)
            .bind(is_active)
            .bind(OffsetDateTime::now_utc())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(CategoryRecord::from(row))
    }

    async fn delete_category(&self, id: CategoryId) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
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
