//! Per-episode relation maps shared by loaders and the assembler.

use std::sync::{RwLock, RwLockReadGuard};

use crate::cache::{CategoryMap, Pooled, PostTagMap, RelationPools, rw_read, rw_write};
use crate::domain::entities::{CategoryRecord, TagRecord};
use crate::domain::types::CategoryId;

const SOURCE: &str = "relations::maps";

struct Maps {
    categories: Pooled<CategoryMap>,
    post_tags: Pooled<PostTagMap>,
}

/// Category and tag lookups for one loading episode, behind a single
/// reader/writer lock.
///
/// Loaders take the write lock only to bulk-insert finished results. The
/// pooled containers go back to their pools when the maps are dropped.
pub struct RelationMaps {
    inner: RwLock<Maps>,
}

impl RelationMaps {
    pub fn new(categories: Pooled<CategoryMap>, post_tags: Pooled<PostTagMap>) -> Self {
        Self {
            inner: RwLock::new(Maps {
                categories,
                post_tags,
            }),
        }
    }

    pub fn from_pools(pools: &RelationPools) -> Self {
        Self::new(pools.categories_by_id.acquire(), pools.tags_by_post.acquire())
    }

    pub fn insert_categories(&self, rows: impl IntoIterator<Item = (CategoryId, CategoryRecord)>) {
        rw_write(&self.inner, SOURCE, "insert_categories")
            .categories
            .extend(rows);
    }

    pub fn insert_post_tags(&self, rows: impl IntoIterator<Item = (String, Vec<TagRecord>)>) {
        rw_write(&self.inner, SOURCE, "insert_post_tags")
            .post_tags
            .extend(rows);
    }

    /// Hold the read lock for a batch of lookups.
    pub fn read(&self) -> RelationView<'_> {
        RelationView {
            guard: rw_read(&self.inner, SOURCE, "read"),
        }
    }
}

pub struct RelationView<'a> {
    guard: RwLockReadGuard<'a, Maps>,
}

impl RelationView<'_> {
    pub fn category(&self, id: Option<CategoryId>) -> Option<&CategoryRecord> {
        id.and_then(|id| self.guard.categories.get(&id))
    }

    /// Tags of `post_id` in association order; empty when it has none.
    pub fn tags(&self, post_id: &str) -> &[TagRecord] {
        self.guard
            .post_tags
            .get(post_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn category_count(&self) -> usize {
        self.guard.categories.len()
    }

    pub fn tagged_post_count(&self) -> usize {
        self.guard.post_tags.len()
    }
}
