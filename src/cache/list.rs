//! Whole-list cache-aside with coalesced recomputation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::application::repos::RepoError;

use super::coalesce::Coalescer;
use super::config::default_op_timeout;
use super::keys::CacheKey;
use super::store::{CacheStore, decode, encode, with_deadline};

/// Caches derived lists under fixed keys.
///
/// A miss funnels through the shared [`Coalescer`], so concurrent misses on
/// one key run `compute` once and every caller sees that result. Only a
/// successful result is written back.
#[derive(Clone)]
pub struct ListCache {
    store: Option<Arc<dyn CacheStore>>,
    coalescer: Coalescer,
    ttl: Duration,
    op_timeout: Duration,
}

impl ListCache {
    pub fn new(store: Option<Arc<dyn CacheStore>>, coalescer: Coalescer, ttl: Duration) -> Self {
        Self {
            store,
            coalescer,
            ttl,
            op_timeout: default_op_timeout(),
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T, RepoError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RepoError>> + Send + 'static,
    {
        self.get_or_compute_with_ttl(key, self.ttl, compute).await
    }

    pub async fn get_or_compute_with_ttl<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<T, RepoError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RepoError>> + Send + 'static,
    {
        let key = key.to_string();

        if let Some(value) = self.read::<T>(&key).await {
            counter!("quill_list_cache_hit_total").increment(1);
            return Ok(value);
        }
        counter!("quill_list_cache_miss_total").increment(1);

        let store = self.store.clone();
        let op_timeout = self.op_timeout;
        let fill_key = key.clone();
        let value = self
            .coalescer
            .run(&key, move || async move {
                let value = compute().await?;
                if let Some(store) = store {
                    write_back(store.as_ref(), &fill_key, &value, ttl, op_timeout).await;
                }
                Ok(value)
            })
            .await?;

        Ok(Arc::unwrap_or_clone(value))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        match with_deadline("get", self.op_timeout, store.get(key)).await {
            Ok(Some(payload)) => match decode(&payload) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, op = "get", "discarding undecodable list cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                counter!("quill_cache_error_total", "op" => "get").increment(1);
                warn!(key, backend = store.backend(), error = %err, op = "get", "list cache read failed");
                None
            }
        }
    }
}

async fn write_back<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
    op_timeout: Duration,
) {
    let payload = match encode(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(key, error = %err, op = "set", "list cache payload could not be encoded");
            return;
        }
    };
    if let Err(err) = with_deadline("set", op_timeout, store.set(key, payload, ttl)).await {
        counter!("quill_cache_error_total", "op" => "set").increment(1);
        warn!(key, backend = store.backend(), error = %err, op = "set", "list cache write failed");
    }
}
