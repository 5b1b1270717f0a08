//! Entry point for loading posts together with their relations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::repos::{PostTagsRepo, RepoError};
use crate::cache::{CategoryBatchLoader, RelationPools, TagBatchLoader, extend_unique};
use crate::domain::entities::PostRecord;
use crate::domain::types::TagId;

use super::RelationError;
use super::assembly::{AssemblyOptions, PostView, PostViewBuilder};
use super::coordinator::LoadCoordinator;
use super::loader::{CategoryLoader, RelationLoader, TagLoader};
use super::maps::RelationMaps;

const DEFAULT_MAX_CONCURRENT_LOADS: usize = 16;
const DEFAULT_POOL_MAX_IDLE: usize = 64;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Ceiling on loaders running at once across every episode.
    pub max_concurrent_loads: usize,
    pub assembly: AssemblyOptions,
    /// `None` lets an episode run until its loaders finish.
    pub load_timeout: Option<Duration>,
    /// Idle containers kept per pool; zero disables pooling.
    pub pool_max_idle: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            assembly: AssemblyOptions::default(),
            load_timeout: None,
            pool_max_idle: DEFAULT_POOL_MAX_IDLE,
        }
    }
}

impl From<&crate::config::RelationsSettings> for EngineOptions {
    fn from(settings: &crate::config::RelationsSettings) -> Self {
        Self {
            max_concurrent_loads: settings.max_concurrent_loads.get(),
            assembly: AssemblyOptions {
                parallel_threshold: settings.parallel_assembly_threshold.get(),
                chunk_size: settings.assembly_chunk_size,
            },
            load_timeout: settings.load_timeout,
            pool_max_idle: settings.pool_max_idle,
        }
    }
}

/// Loads categories and tags for posts and assembles [`PostView`]s.
pub struct RelationEngine {
    categories: CategoryBatchLoader,
    tags: TagBatchLoader,
    post_tags: Arc<dyn PostTagsRepo>,
    coordinator: LoadCoordinator,
    pools: RelationPools,
    options: EngineOptions,
}

impl RelationEngine {
    pub fn new(
        categories: CategoryBatchLoader,
        tags: TagBatchLoader,
        post_tags: Arc<dyn PostTagsRepo>,
        options: EngineOptions,
    ) -> Self {
        let pools = RelationPools::new(options.pool_max_idle);
        let loaders: Vec<Arc<dyn RelationLoader>> = vec![
            Arc::new(CategoryLoader::new(categories.clone(), pools.clone())),
            Arc::new(TagLoader::new(
                tags.clone(),
                Arc::clone(&post_tags),
                pools.clone(),
            )),
        ];
        let coordinator = LoadCoordinator::with_limit(loaders, options.max_concurrent_loads);

        Self {
            categories,
            tags,
            post_tags,
            coordinator,
            pools,
            options,
        }
    }

    pub fn categories(&self) -> &CategoryBatchLoader {
        &self.categories
    }

    pub fn tags(&self) -> &TagBatchLoader {
        &self.tags
    }

    pub fn pools(&self) -> &RelationPools {
        &self.pools
    }

    pub async fn load_posts(&self, posts: &[PostRecord]) -> Result<Vec<PostView>, RelationError> {
        self.load_posts_with_cancel(posts, &CancellationToken::new())
            .await
    }

    /// Load relations for `posts` and assemble them in input order.
    ///
    /// Cancelling `cancel` or exceeding the configured timeout stops the
    /// episode before any new backing-store work starts.
    pub async fn load_posts_with_cancel(
        &self,
        posts: &[PostRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<PostView>, RelationError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let maps = Arc::new(RelationMaps::from_pools(&self.pools));
        let episode = cancel.child_token();

        let load = self.coordinator.load_all(posts, &maps, &episode);
        match self.options.load_timeout {
            Some(limit) => {
                tokio::pin!(load);
                match tokio::time::timeout(limit, &mut load).await {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        // Unstarted loaders observe the cancelled episode and bail out.
                        episode.cancel();
                        let _ = load.await;
                        warn!(posts_count = posts.len(), timeout = ?limit, "relation loading timed out");
                        return Err(RelationError::TimedOut(limit));
                    }
                }
            }
            None => load.await?,
        }
        let loaded_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("quill_relations_load_ms").record(loaded_ms);

        let assembly_started = Instant::now();
        let views = self.assemble(posts, &maps).await?;
        histogram!("quill_relations_assembly_ms")
            .record(assembly_started.elapsed().as_secs_f64() * 1000.0);

        {
            let view = maps.read();
            info!(
                posts_count = posts.len(),
                categories = view.category_count(),
                tagged_posts = view.tagged_post_count(),
                parallel = posts.len() >= self.options.assembly.parallel_threshold,
                load_ms = loaded_ms,
                duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                "relations loaded"
            );
        }

        Ok(views)
    }

    /// Small batches assemble inline. Large ones run on the rayon pool so the
    /// async worker stays free while chunks are built.
    async fn assemble(
        &self,
        posts: &[PostRecord],
        maps: &Arc<RelationMaps>,
    ) -> Result<Vec<PostView>, RelationError> {
        let options = self.options.assembly;
        if posts.len() < options.parallel_threshold {
            return Ok(PostViewBuilder::new(maps, options).build(posts));
        }

        let (tx, rx) = oneshot::channel();
        let owned = posts.to_vec();
        let maps = Arc::clone(maps);
        rayon::spawn(move || {
            let views = PostViewBuilder::new(&maps, options).build_parallel(&owned);
            // Release the scratch maps before the caller resumes.
            drop(maps);
            let _ = tx.send(views);
        });

        rx.await.map_err(|_| RelationError::TaskFailed {
            message: "assembly worker exited without a result".to_string(),
        })
    }

    /// Single-post path: no fan-out and no pooling.
    pub async fn load_post(&self, post: &PostRecord) -> Result<PostView, RelationError> {
        let category = async {
            match post.category_id {
                Some(id) => self
                    .categories
                    .get(id)
                    .await
                    .map_err(|source| RelationError::Load {
                        loader: "category",
                        source,
                    }),
                None => Ok(None),
            }
        };
        let tags = async {
            let rows = self
                .post_tags
                .list_for_posts(std::slice::from_ref(&post.post_id))
                .await?;
            let mut ids: Vec<TagId> = Vec::with_capacity(rows.len());
            extend_unique(&mut ids, rows.iter().map(|row| row.tag_id));
            let found = self.tags.batch_get(&ids).await?;
            Ok::<_, RepoError>(
                ids.iter()
                    .filter_map(|id| found.get(id).cloned())
                    .collect::<Vec<_>>(),
            )
        };
        let tags = async {
            tags.await
                .map_err(|source| RelationError::Load { loader: "tag", source })
        };

        let (category, tags) = tokio::try_join!(category, tags)?;
        debug!(post_id = %post.post_id, tags = tags.len(), "single post relations loaded");

        Ok(PostView {
            post: post.clone(),
            category,
            tags,
        })
    }
}
