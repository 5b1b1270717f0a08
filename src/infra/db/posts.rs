use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use crate::application::repos::{
    CreatePostParams, PageRequest, PostQueryFilter, PostsRepo, PostsWriteRepo, RepoError,
    UpdatePostParams,
};
use crate::domain::entities::PostRecord;
use crate::domain::types::{PostStatus, TagId};

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "p.id, p.post_id, p.user_id, p.title, p.summary, p.cover, \
    p.category_id, p.status, p.position, p.view_count, p.like_count, p.published_at, \
    p.created_at, p.updated_at";

const RETURNING_COLUMNS: &str = "id, post_id, user_id, title, summary, content, cover, \
    category_id, status, position, view_count, like_count, published_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    post_id: String,
    user_id: String,
    title: String,
    summary: Option<String>,
    content: Option<String>,
    cover: Option<String>,
    category_id: Option<i32>,
    status: PostStatus,
    position: i32,
    view_count: i64,
    like_count: i64,
    published_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            title: row.title,
            summary: row.summary,
            content: row.content,
            cover: row.cover,
            category_id: row.category_id,
            status: row.status,
            position: row.position,
            view_count: row.view_count,
            like_count: row.like_count,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PostgresRepositories {
    fn apply_post_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &PostQueryFilter) {
        qb.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND p.status = ");
            qb.push_bind(status);
        }
        if let Some(category_id) = filter.category_id {
            qb.push(" AND p.category_id = ");
            qb.push_bind(category_id);
        }
    }

    async fn replace_post_tags(
        tx: &mut Transaction<'_, Postgres>,
        post_id: &str,
        tag_ids: &[TagId],
    ) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;

        if tag_ids.is_empty() {
            return Ok(());
        }

        // unnest WITH ORDINALITY keeps association order in the serial ids.
        sqlx::query(
            r#"
            INSERT INTO post_tags (post_id, tag_id)
            SELECT $1, t.tag_id
            FROM unnest($2::int4[]) WITH ORDINALITY AS t(tag_id, ord)
            ORDER BY t.ord
            "#,
        )
        .bind(post_id)
        .bind(tag_ids)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

fn published_at_for(status: PostStatus, now: OffsetDateTime) -> Option<OffsetDateTime> {
    (status == PostStatus::Published).then_some(now)
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_posts(
        &self,
        filter: &PostQueryFilter,
        page: PageRequest,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let content = if filter.include_content {
            "p.content"
        } else {
            "NULL::text AS content"
        };
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {POST_COLUMNS}, {content} FROM posts p"));
        Self::apply_post_filter(&mut qb, filter);
        qb.push(" ORDER BY p.position DESC, p.published_at DESC NULLS LAST, p.id DESC");
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(page.limit).unwrap_or(i64::MAX));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(page.offset).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    async fn count_posts(&self, filter: &PostQueryFilter) -> Result<u64, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM posts p");
        Self::apply_post_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn find_by_post_id(&self, post_id: &str) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS}, p.content FROM posts p WHERE p.post_id = $1");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let CreatePostParams {
            post_id,
            user_id,
            title,
            summary,
            content,
            cover,
            category_id,
            status,
            position,
            tag_ids,
        } = params;

        let now = OffsetDateTime::now_utc();
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let sql = format!(
            "INSERT INTO posts \
                (post_id, user_id, title, summary, content, cover, category_id, status, position, \
                 published_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             RETURNING {RETURNING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(&post_id)
            .bind(user_id)
            .bind(title)
            .bind(summary)
            .bind(content)
            .bind(cover)
            .bind(category_id)
            .bind(status)
            .bind(position)
            .bind(published_at_for(status, now))
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Self::replace_post_tags(&mut tx, &post_id, &tag_ids).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(post_id = %post_id, tags = tag_ids.len(), "post inserted");
        Ok(PostRecord::from(row))
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let UpdatePostParams {
            post_id,
            title,
            summary,
            content,
            cover,
            category_id,
            status,
            position,
            tag_ids,
        } = params;

        let now = OffsetDateTime::now_utc();
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // published_at is stamped on the first transition to published and kept afterwards.
        let sql = format!(
            "UPDATE posts \
             SET title = $2, summary = $3, content = $4, cover = $5, category_id = $6, \
                 status = $7, position = $8, \
                 published_at = CASE \
                     WHEN $7 = 'published'::post_status THEN COALESCE(published_at, $9) \
                     ELSE published_at \
                 END, \
                 updated_at = $9 \
             WHERE post_id = $1 \
             RETURNING {RETURNING_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(&post_id)
            .bind(title)
            .bind(summary)
            .bind(content)
            .bind(cover)
            .bind(category_id)
            .bind(status)
            .bind(position)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if let Some(tag_ids) = tag_ids.as_deref() {
            Self::replace_post_tags(&mut tx, &post_id, tag_ids).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    async fn delete_posts(&self, post_ids: &[String]) -> Result<u64, RepoError> {
        if post_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM posts WHERE post_id = ANY($1)")
            .bind(post_ids)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_binds_status_and_category() {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM posts p");
        let filter = PostQueryFilter {
            status: Some(PostStatus::Published),
            category_id: Some(4),
            include_content: false,
        };
        PostgresRepositories::apply_post_filter(&mut qb, &filter);

        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM posts p WHERE TRUE AND p.status = $1 AND p.category_id = $2"
        );
    }

    #[test]
    fn only_published_posts_get_a_publication_time() {
        let now = OffsetDateTime::UNIX_EPOCH;
        assert_eq!(published_at_for(PostStatus::Published, now), Some(now));
        assert_eq!(published_at_for(PostStatus::Draft, now), None);
    }
}
