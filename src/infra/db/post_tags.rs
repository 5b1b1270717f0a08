use async_trait::async_trait;

use crate::application::repos::{PostTagsRepo, RepoError};
use crate::domain::entities::PostTagRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct PostTagRow {
    post_id: String,
    tag_id: i32,
}

impl From<PostTagRow> for PostTagRecord {
    fn from(row: PostTagRow) -> Self {
        Self {
            post_id: row.post_id,
            tag_id: row.tag_id,
        }
    }
}

#[async_trait]
impl PostTagsRepo for PostgresRepositories {
    async fn list_for_posts(&self, post_ids: &[String]) -> Result<Vec<PostTagRecord>, RepoError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PostTagRow>(
            r#"
            SELECT post_id, tag_id
            FROM post_tags
            WHERE post_id = ANY($1)
            ORDER BY post_id, id
            "#,
        )
        .bind(post_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostTagRecord::from).collect())
    }
}
