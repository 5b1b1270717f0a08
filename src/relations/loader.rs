//! Relation loaders run by the coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::repos::PostTagsRepo;
use crate::cache::{CategoryBatchLoader, RelationPools, TagBatchLoader, extend_unique};
use crate::domain::entities::PostRecord;
use crate::domain::types::TagId;

use super::RelationError;
use super::maps::RelationMaps;

pub type LoadWork = BoxFuture<'static, Result<(), RelationError>>;

/// One independent kind of relation to resolve for a batch of posts.
pub trait RelationLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Collect the ids this loader needs from `posts` right away and return
    /// the work that resolves them into `maps`.
    ///
    /// The work checks `cancel` before every backing-store call and stops
    /// with [`RelationError::Cancelled`] once it fires.
    fn prepare(
        &self,
        posts: &[PostRecord],
        maps: &Arc<RelationMaps>,
        cancel: &CancellationToken,
    ) -> LoadWork;
}

fn ensure_live(loader: &'static str, cancel: &CancellationToken) -> Result<(), RelationError> {
    if cancel.is_cancelled() {
        debug!(loader, "episode cancelled, not starting backing-store work");
        return Err(RelationError::Cancelled);
    }
    Ok(())
}

pub struct CategoryLoader {
    categories: CategoryBatchLoader,
    pools: RelationPools,
}

impl CategoryLoader {
    pub fn new(categories: CategoryBatchLoader, pools: RelationPools) -> Self {
        Self { categories, pools }
    }
}

impl RelationLoader for CategoryLoader {
    fn name(&self) -> &'static str {
        "category"
    }

    fn prepare(
        &self,
        posts: &[PostRecord],
        maps: &Arc<RelationMaps>,
        cancel: &CancellationToken,
    ) -> LoadWork {
        let name = self.name();
        let mut ids = self.pools.category_ids.acquire();
        extend_unique(&mut ids, posts.iter().filter_map(|post| post.category_id));

        let categories = self.categories.clone();
        let maps = Arc::clone(maps);
        let cancel = cancel.clone();
        async move {
            if ids.is_empty() {
                return Ok(());
            }
            ensure_live(name, &cancel)?;
            let found = categories
                .batch_get(&ids)
                .await
                .map_err(|source| RelationError::load(name, source))?;
            maps.insert_categories(found);
            Ok(())
        }
        .boxed()
    }
}

pub struct TagLoader {
    tags: TagBatchLoader,
    post_tags: Arc<dyn PostTagsRepo>,
    pools: RelationPools,
}

impl TagLoader {
    pub fn new(tags: TagBatchLoader, post_tags: Arc<dyn PostTagsRepo>, pools: RelationPools) -> Self {
        Self {
            tags,
            post_tags,
            pools,
        }
    }
}

impl RelationLoader for TagLoader {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn prepare(
        &self,
        posts: &[PostRecord],
        maps: &Arc<RelationMaps>,
        cancel: &CancellationToken,
    ) -> LoadWork {
        let name = self.name();
        let mut post_ids = self.pools.post_ids.acquire();
        let mut seen: HashSet<&str> = HashSet::with_capacity(posts.len());
        post_ids.extend(
            posts
                .iter()
                .filter(|post| seen.insert(post.post_id.as_str()))
                .map(|post| post.post_id.clone()),
        );

        let tags = self.tags.clone();
        let post_tags = Arc::clone(&self.post_tags);
        let mut tag_ids = self.pools.tag_ids.acquire();
        let maps = Arc::clone(maps);
        let cancel = cancel.clone();
        async move {
            ensure_live(name, &cancel)?;
            let rows = post_tags
                .list_for_posts(&post_ids)
                .await
                .map_err(|source| RelationError::load(name, source))?;
            if rows.is_empty() {
                return Ok(());
            }

            let mut grouped: HashMap<String, Vec<TagId>> = HashMap::new();
            for row in &rows {
                grouped
                    .entry(row.post_id.clone())
                    .or_default()
                    .push(row.tag_id);
            }
            extend_unique(&mut tag_ids, rows.iter().map(|row| row.tag_id));

            // The association query may have outlived its episode.
            ensure_live(name, &cancel)?;
            let found = tags
                .batch_get(&tag_ids)
                .await
                .map_err(|source| RelationError::load(name, source))?;
            maps.insert_post_tags(grouped.into_iter().map(|(post_id, ids)| {
                let resolved = ids.iter().filter_map(|id| found.get(id).cloned()).collect();
                (post_id, resolved)
            }));
            Ok(())
        }
        .boxed()
    }
}
