//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{CategoryId, PostRowId, PostStatus, TagId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub theme: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CategoryRecord {
    /// `None` and `Some(0)` both denote a root category.
    pub fn parent(&self) -> Option<CategoryId> {
        self.parent_id.filter(|id| *id != 0)
    }

    pub fn sort_key(&self) -> i32 {
        self.sort_order.unwrap_or(0)
    }

    /// A category with no explicit flag is treated as active.
    pub fn active(&self) -> bool {
        self.is_active.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: TagId,
    pub name: String,
    pub color: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostRowId,
    pub post_id: String,
    pub user_id: String,
    pub title: String,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub cover: Option<String>,
    pub category_id: Option<CategoryId>,
    pub status: PostStatus,
    pub position: i32,
    pub view_count: i64,
    pub like_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Association row linking a post to one of its tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTagRecord {
    pub post_id: String,
    pub tag_id: TagId,
}
