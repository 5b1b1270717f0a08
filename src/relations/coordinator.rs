//! Bounded fan-out over relation loaders.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::PostRecord;

use super::RelationError;
use super::loader::RelationLoader;
use super::maps::RelationMaps;

/// Runs every registered loader concurrently for one batch of posts.
///
/// The semaphore is shared by every coordinator built from the same engine,
/// so it caps in-flight loaders across all concurrent requests rather than
/// per request.
pub struct LoadCoordinator {
    loaders: Vec<Arc<dyn RelationLoader>>,
    permits: Arc<Semaphore>,
}

impl LoadCoordinator {
    pub fn new(loaders: Vec<Arc<dyn RelationLoader>>, permits: Arc<Semaphore>) -> Self {
        Self { loaders, permits }
    }

    pub fn with_limit(loaders: Vec<Arc<dyn RelationLoader>>, max_concurrent: usize) -> Self {
        Self::new(loaders, Arc::new(Semaphore::new(max_concurrent.max(1))))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Load every relation for `posts` into `maps`.
    ///
    /// Returns the first failure without waiting for the remaining loaders;
    /// those are told to stop before starting new work and are left to
    /// finish any query already issued. Cancelling `cancel` has the same
    /// effect and yields [`RelationError::Cancelled`].
    pub async fn load_all(
        &self,
        posts: &[PostRecord],
        maps: &Arc<RelationMaps>,
        cancel: &CancellationToken,
    ) -> Result<(), RelationError> {
        if posts.is_empty() {
            return Ok(());
        }

        let episode = cancel.child_token();
        let mut tasks = JoinSet::new();

        for loader in &self.loaders {
            let name = loader.name();
            let work = loader.prepare(posts, maps, &episode);
            let permits = Arc::clone(&self.permits);
            let episode = episode.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = episode.cancelled() => return Err(RelationError::Cancelled),
                    permit = permits.acquire_owned() => {
                        permit.map_err(|_| RelationError::Cancelled)?
                    }
                };
                if episode.is_cancelled() {
                    debug!(loader = name, "skipping relation loader after cancellation");
                    return Err(RelationError::Cancelled);
                }
                work.await
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                joined = tasks.join_next() => joined,
                _ = episode.cancelled() => {
                    tasks.detach_all();
                    return Err(RelationError::Cancelled);
                }
            };

            let Some(joined) = joined else {
                return Ok(());
            };

            let outcome = joined.unwrap_or_else(|err| {
                Err(RelationError::TaskFailed {
                    message: err.to_string(),
                })
            });

            if let Err(err) = outcome {
                warn!(error = %err, pending = tasks.len(), "relation loading failed");
                episode.cancel();
                tasks.detach_all();
                return Err(err);
            }
        }
    }
}
