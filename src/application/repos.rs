//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{CategoryRecord, PostRecord, PostTagRecord, TagRecord};
use crate::domain::types::{CategoryId, PostStatus, TagId};

/// Errors raised by persistence adapters.
///
/// `Clone` so a single failure can be handed to every waiter of a coalesced
/// computation.
#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryQueryFilter {
    /// Restrict to categories whose `is_active` flag is unset or true.
    pub active_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostQueryFilter {
    pub status: Option<PostStatus>,
    pub category_id: Option<CategoryId>,
    /// Listing queries leave `content` empty unless asked.
    pub include_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
}

impl PageRequest {
    pub const MAX_LIMIT: u64 = 100;

    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoryParams {
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub theme: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct TagParams {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub post_id: String,
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
pub struct UpdatePostParams {
    pub post_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub cover: Option<String>,
    pub category_id: Option<CategoryId>,
    pub status: PostStatus,
    pub position: i32,
    /// `None` leaves the existing associations untouched.
    pub tag_ids: Option<Vec<TagId>>,
}

#[async_trait]
pub trait CategoriesRepo: Send + Sync {
    /// Fetch every category whose id is in `ids` in one round trip.
    async fn find_by_ids(&self, ids: &[CategoryId]) -> Result<Vec<CategoryRecord>, RepoError>;

    async fn list_categories(
        &self,
        filter: CategoryQueryFilter,
    ) -> Result<Vec<CategoryRecord>, RepoError>;
}

#[async_trait]
pub trait CategoriesWriteRepo: Send + Sync {
    async fn create_category(&self, params: CategoryParams) -> Result<CategoryRecord, RepoError>;

    async fn update_category(
        &self,
        id: CategoryId,
        params: CategoryParams,
    ) -> Result<CategoryRecord, RepoError>;

    async fn delete_category(&self, id: CategoryId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait TagsRepo: Send + Sync {
    /// Fetch every tag whose id is in `ids` in one round trip.
    async fn find_by_ids(&self, ids: &[TagId]) -> Result<Vec<TagRecord>, RepoError>;

    async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError>;
}

#[async_trait]
pub trait TagsWriteRepo: Send + Sync {
    async fn create_tag(&self, params: TagParams) -> Result<TagRecord, RepoError>;

    async fn update_tag(&self, id: TagId, params: TagParams) -> Result<TagRecord, RepoError>;

    async fn delete_tag(&self, id: TagId) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn list_posts(
        &self,
        filter: &PostQueryFilter,
        page: PageRequest,
    ) -> Result<Vec<PostRecord>, RepoError>;

    async fn count_posts(&self, filter: &PostQueryFilter) -> Result<u64, RepoError>;

    async fn find_by_post_id(&self, post_id: &str) -> Result<Option<PostRecord>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    /// Insert the post and its tag associations in one transaction.
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    /// Update the post and, when `tag_ids` is set, replace its associations
    /// in the same transaction.
    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError>;

    /// Delete posts and their associations, returning the number of posts removed.
    async fn delete_posts(&self, post_ids: &[String]) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait PostTagsRepo: Send + Sync {
    /// Association rows for `post_ids`, ordered by post then insertion order.
    async fn list_for_posts(&self, post_ids: &[String]) -> Result<Vec<PostTagRecord>, RepoError>;
}
