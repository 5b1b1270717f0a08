//! Invalidation entry points called by write paths.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::domain::types::{CategoryId, TagId};

use super::config::default_op_timeout;
use super::keys::CacheKey;
use super::store::{CacheStore, with_deadline};

/// Drops cache entries made stale by a category or tag write.
///
/// Write paths await these calls before reporting success. A failed delete
/// is logged and does not fail the write.
#[derive(Clone)]
pub struct CacheInvalidator {
    store: Option<Arc<dyn CacheStore>>,
    op_timeout: Duration,
}

impl CacheInvalidator {
    pub fn new(store: Option<Arc<dyn CacheStore>>) -> Self {
        Self {
            store,
            op_timeout: default_op_timeout(),
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// `id` is `None` for creates, where only the list entries are stale.
    pub async fn category_changed(&self, id: Option<CategoryId>) {
        let keys = id
            .map(CacheKey::Category)
            .into_iter()
            .chain(CacheKey::category_lists())
            .collect();
        self.delete("category", keys).await;
    }

    pub async fn tag_changed(&self, id: Option<TagId>) {
        let keys = id
            .map(CacheKey::Tag)
            .into_iter()
            .chain(std::iter::once(CacheKey::TagList))
            .collect();
        self.delete("tag", keys).await;
    }

    async fn delete(&self, kind: &'static str, keys: Vec<CacheKey>) {
        let Some(store) = &self.store else {
            return;
        };
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        match with_deadline("delete", self.op_timeout, store.delete(&rendered)).await {
            Ok(removed) => debug!(kind, keys = ?rendered, removed, "cache entries invalidated"),
            Err(err) => {
                counter!("quill_cache_error_total", "op" => "delete").increment(1);
                warn!(kind, keys = ?rendered, backend = store.backend(), error = %err, op = "delete", "cache invalidation failed");
            }
        }
    }
}
