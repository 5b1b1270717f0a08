use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::categories::trim_optional;
use crate::application::error::AppError;
use crate::application::repos::{
    CreatePostParams, PageRequest, PostQueryFilter, PostsRepo, PostsWriteRepo, UpdatePostParams,
};
use crate::cache::{CacheKey, ListCache, extend_unique};
use crate::domain::error::DomainError;
use crate::domain::types::{CategoryId, PostStatus, TagId};
use crate::relations::{PostView, RelationEngine};

const POST_ID_PREFIX: &str = "post-";
const POST_ID_SUFFIX_LEN: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub items: Vec<PostView>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct CreatePostCommand {
    pub user_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover: Option<String>,
    pub category_id: Option<CategoryId>,
    pub status: PostStatus,
    pub position: i32,
    pub tag_ids: Vec<TagId>,
}

#[derive(Debug, Clone)]
pub struct UpdatePostCommand {
    pub post_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover: Option<String>,
    pub category_id: Option<CategoryId>,
    pub status: PostStatus,
    pub position: i32,
    pub tag_ids: Option<Vec<TagId>>,
}

/// Post listing and detail reads with relations attached.
#[derive(Clone)]
pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    relations: Arc<RelationEngine>,
    counts: ListCache,
    count_ttl: Duration,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        relations: Arc<RelationEngine>,
        counts: ListCache,
        count_ttl: Duration,
    ) -> Self {
        Self {
            reader,
            writer,
            relations,
            counts,
            count_ttl,
        }
    }

    /// Any-status listing for management views. The total is not cached.
    pub async fn list(
        &self,
        filter: &PostQueryFilter,
        page: PageRequest,
    ) -> Result<PostPage, AppError> {
        let (posts, total) = tokio::try_join!(
            self.reader.list_posts(filter, page),
            self.reader.count_posts(filter)
        )?;
        let items = self.relations.load_posts(&posts).await?;
        Ok(PostPage {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// Published posts, optionally within one category. The total comes from
    /// the short-lived count cache.
    pub async fn list_published(
        &self,
        category_id: Option<CategoryId>,
        page: PageRequest,
    ) -> Result<PostPage, AppError> {
        let filter = PostQueryFilter {
            status: Some(PostStatus::Published),
            category_id,
            include_content: false,
        };
        let key = CacheKey::PostCount {
            status: filter.status,
            category_id,
        };

        let reader = Arc::clone(&self.reader);
        let count_filter = filter.clone();
        let count = self
            .counts
            .get_or_compute_with_ttl(&key, self.count_ttl, move || async move {
                reader.count_posts(&count_filter).await
            });

        let (posts, total) = tokio::try_join!(self.reader.list_posts(&filter, page), count)?;
        let items = self.relations.load_posts(&posts).await?;
        debug!(
            category_id = ?category_id,
            returned = items.len(),
            total,
            "published posts listed"
        );

        Ok(PostPage {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        })
    }

    pub async fn get(&self, post_id: &str) -> Result<PostView, AppError> {
        let post = self
            .reader
            .find_by_post_id(post_id)
            .await?
            .ok_or(DomainError::not_found("post"))?;
        Ok(self.relations.load_post(&post).await?)
    }

    pub async fn create(&self, command: CreatePostCommand) -> Result<PostView, AppError> {
        let title = require_title(&command.title)?;
        let mut tag_ids = Vec::with_capacity(command.tag_ids.len());
        extend_unique(&mut tag_ids, command.tag_ids);

        let params = CreatePostParams {
            post_id: generate_post_id(),
            user_id: command.user_id,
            title,
            summary: trim_optional(command.summary),
            content: command.content,
            cover: trim_optional(command.cover),
            category_id: command.category_id.filter(|id| *id != 0),
            status: command.status,
            position: command.position,
            tag_ids,
        };

        let post = self.writer.create_post(params).await?;
        info!(post_id = %post.post_id, "post created");
        Ok(self.relations.load_post(&post).await?)
    }

    pub async fn update(&self, command: UpdatePostCommand) -> Result<PostView, AppError> {
        let title = require_title(&command.title)?;
        let tag_ids = command.tag_ids.map(|ids| {
            let mut unique = Vec::with_capacity(ids.len());
            extend_unique(&mut unique, ids);
            unique
        });

        let params = UpdatePostParams {
            post_id: command.post_id,
            title,
            summary: trim_optional(command.summary),
            content: command.content,
            cover: trim_optional(command.cover),
            category_id: command.category_id.filter(|id| *id != 0),
            status: command.status,
            position: command.position,
            tag_ids,
        };

        let post = self.writer.update_post(params).await?;
        info!(post_id = %post.post_id, "post updated");
        Ok(self.relations.load_post(&post).await?)
    }

    pub async fn delete(&self, post_ids: &[String]) -> Result<u64, AppError> {
        if post_ids.is_empty() {
            return Ok(0);
        }
        let removed = self.writer.delete_posts(post_ids).await?;
        info!(requested = post_ids.len(), removed, "posts deleted");
        Ok(removed)
    }
}

fn require_title(title: &str) -> Result<String, DomainError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DomainError::validation("post title must not be empty"));
    }
    Ok(title.to_string())
}

pub fn generate_post_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{POST_ID_PREFIX}{}", &suffix[..POST_ID_SUFFIX_LEN])
}
