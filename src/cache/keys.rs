//! Cache key definitions.
//!
//! Every key rendered into the shared store is namespaced with
//! [`KEY_PREFIX`] so several deployments can share one cache server.

use std::fmt;

use crate::application::repos::CategoryQueryFilter;
use crate::domain::types::{CategoryId, PostStatus, TagId};

pub const KEY_PREFIX: &str = "quill";

/// Entity kinds served by the batch loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Category,
    Tag,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Tag => "tag",
        }
    }
}

/// Cached category list variants.
///
/// Adding a variant here is enough for it to be cached, coalesced and
/// invalidated on category writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryListVariant {
    All,
    Active,
}

impl CategoryListVariant {
    pub const ALL: [CategoryListVariant; 2] = [CategoryListVariant::All, CategoryListVariant::Active];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryListVariant::All => "all",
            CategoryListVariant::Active => "active",
        }
    }

    pub fn filter(self) -> CategoryQueryFilter {
        CategoryQueryFilter {
            active_only: matches!(self, CategoryListVariant::Active),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Category(CategoryId),
    Tag(TagId),
    CategoryList(CategoryListVariant),
    TagList,
    PostCount {
        status: Option<PostStatus>,
        category_id: Option<CategoryId>,
    },
}

impl CacheKey {
    pub fn entity(kind: EntityKind, id: i32) -> Self {
        match kind {
            EntityKind::Category => CacheKey::Category(id),
            EntityKind::Tag => CacheKey::Tag(id),
        }
    }

    /// Keys dropped whenever any category is written.
    pub fn category_lists() -> impl Iterator<Item = CacheKey> {
        CategoryListVariant::ALL.into_iter().map(CacheKey::CategoryList)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Category(id) => write!(f, "{KEY_PREFIX}:category:{id}"),
            CacheKey::Tag(id) => write!(f, "{KEY_PREFIX}:tag:{id}"),
            CacheKey::CategoryList(variant) => {
                write!(f, "{KEY_PREFIX}:category:list:{}", variant.as_str())
            }
            CacheKey::TagList => write!(f, "{KEY_PREFIX}:tag:list:all"),
            CacheKey::PostCount {
                status,
                category_id,
            } => {
                let status = status.map(PostStatus::as_str).unwrap_or("any");
                write!(f, "{KEY_PREFIX}:count:posts:status:{status}:category:")?;
                match category_id {
                    Some(id) => write!(f, "{id}"),
                    None => f.write_str("any"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_are_namespaced_by_kind() {
        assert_eq!(CacheKey::Category(5).to_string(), "quill:category:5");
        assert_eq!(CacheKey::Tag(5).to_string(), "quill:tag:5");
        assert_eq!(CacheKey::entity(EntityKind::Tag, 9), CacheKey::Tag(9));
    }

    #[test]
    fn list_keys_do_not_collide_with_entity_keys() {
        let keys: Vec<String> = CacheKey::category_lists().map(|key| key.to_string()).collect();
        assert_eq!(
            keys,
            vec!["quill:category:list:all", "quill:category:list:active"]
        );
        assert_eq!(CacheKey::TagList.to_string(), "quill:tag:list:all");
    }

    #[test]
    fn post_count_key_encodes_filter() {
        let key = CacheKey::PostCount {
            status: Some(PostStatus::Published),
            category_id: Some(3),
        };
        assert_eq!(key.to_string(), "quill:count:posts:status:published:category:3");

        let unfiltered = CacheKey::PostCount {
            status: None,
            category_id: None,
        };
        assert_eq!(
            unfiltered.to_string(),
            "quill:count:posts:status:any:category:any"
        );
    }

    #[test]
    fn active_variant_filters_inactive() {
        assert!(CategoryListVariant::Active.filter().active_only);
        assert!(!CategoryListVariant::All.filter().active_only);
    }
}
