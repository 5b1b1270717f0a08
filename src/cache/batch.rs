//! Batch cache-aside loading of entities by id.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use crate::application::repos::{CategoriesRepo, RepoError, TagsRepo};
use crate::domain::entities::{CategoryRecord, TagRecord};

use super::config::default_op_timeout;
use super::keys::{CacheKey, EntityKind};
use super::store::{CacheStore, decode, encode, with_deadline};

/// An entity that can be cached under `<kind>:<id>`.
pub trait CacheEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> i32;

    fn cache_key(id: i32) -> CacheKey {
        CacheKey::entity(Self::KIND, id)
    }
}

impl CacheEntity for CategoryRecord {
    const KIND: EntityKind = EntityKind::Category;

    fn id(&self) -> i32 {
        self.id
    }
}

impl CacheEntity for TagRecord {
    const KIND: EntityKind = EntityKind::Tag;

    fn id(&self) -> i32 {
        self.id
    }
}

/// System of record for one entity kind.
#[async_trait]
pub trait EntitySource<T: CacheEntity>: Send + Sync {
    async fn fetch_by_ids(&self, ids: &[i32]) -> Result<Vec<T>, RepoError>;
}

#[async_trait]
impl<R: CategoriesRepo + ?Sized> EntitySource<CategoryRecord> for R {
    async fn fetch_by_ids(&self, ids: &[i32]) -> Result<Vec<CategoryRecord>, RepoError> {
        self.find_by_ids(ids).await
    }
}

#[async_trait]
impl<R: TagsRepo + ?Sized> EntitySource<TagRecord> for R {
    async fn fetch_by_ids(&self, ids: &[i32]) -> Result<Vec<TagRecord>, RepoError> {
        self.find_by_ids(ids).await
    }
}

/// Push each id of `ids` into `out` once, keeping first-seen order.
pub fn extend_unique<I: Copy + Eq + Hash>(out: &mut Vec<I>, ids: impl IntoIterator<Item = I>) {
    let mut seen: HashSet<I> = out.iter().copied().collect();
    for id in ids {
        if seen.insert(id) {
            out.push(id);
        }
    }
}

/// Resolves ids to entities through the cache, falling back to the source
/// for whatever the cache could not answer.
///
/// Cache failures of any kind, including a store slower than the op
/// timeout, degrade to a source fetch and are never returned. Ids unknown to
/// the source are simply absent from the result.
pub struct BatchLoader<T: CacheEntity, S: ?Sized> {
    source: Arc<S>,
    cache: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
    op_timeout: Duration,
    _entity: PhantomData<fn() -> T>,
}

pub type CategoryBatchLoader = BatchLoader<CategoryRecord, dyn CategoriesRepo>;
pub type TagBatchLoader = BatchLoader<TagRecord, dyn TagsRepo>;

impl<T: CacheEntity, S: ?Sized> Clone for BatchLoader<T, S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: self.cache.clone(),
            ttl: self.ttl,
            op_timeout: self.op_timeout,
            _entity: PhantomData,
        }
    }
}

impl<T, S> BatchLoader<T, S>
where
    T: CacheEntity,
    S: EntitySource<T> + ?Sized,
{
    pub fn new(source: Arc<S>, cache: Option<Arc<dyn CacheStore>>, ttl: Duration) -> Self {
        Self {
            source,
            cache,
            ttl,
            op_timeout: default_op_timeout(),
            _entity: PhantomData,
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub async fn get(&self, id: i32) -> Result<Option<T>, RepoError> {
        let mut found = self.batch_get(&[id]).await?;
        Ok(found.remove(&id))
    }

    pub async fn batch_get(&self, ids: &[i32]) -> Result<HashMap<i32, T>, RepoError> {
        let mut unique = Vec::with_capacity(ids.len());
        extend_unique(&mut unique, ids.iter().copied());
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let mut found = HashMap::with_capacity(unique.len());
        let uncached = match &self.cache {
            Some(cache) => read_cached(cache.as_ref(), self.op_timeout, unique, &mut found).await,
            None => unique,
        };

        if uncached.is_empty() {
            return Ok(found);
        }

        let rows = self.source.fetch_by_ids(&uncached).await.map_err(|err| {
            error!(kind = T::KIND.as_str(), ids = ?uncached, error = %err, "batch source fetch failed");
            err
        })?;
        debug!(
            kind = T::KIND.as_str(),
            requested = uncached.len(),
            fetched = rows.len(),
            "batch source fetch"
        );

        if let Some(cache) = &self.cache
            && !rows.is_empty()
        {
            write_back(cache.as_ref(), &rows, self.ttl, self.op_timeout).await;
        }

        found.extend(rows.into_iter().map(|row| (row.id(), row)));
        Ok(found)
    }
}

/// Fill `found` from one multi-get and return the ids that still need a
/// source fetch.
async fn read_cached<T: CacheEntity>(
    cache: &dyn CacheStore,
    op_timeout: Duration,
    unique: Vec<i32>,
    found: &mut HashMap<i32, T>,
) -> Vec<i32> {
    let kind = T::KIND.as_str();
    let keys: Vec<String> = unique.iter().map(|id| T::cache_key(*id).to_string()).collect();

    let values = match with_deadline("mget", op_timeout, cache.mget(&keys)).await {
        Ok(values) if values.len() == keys.len() => values,
        Ok(values) => {
            counter!("quill_cache_error_total", "op" => "mget").increment(1);
            warn!(kind, expected = keys.len(), received = values.len(), op = "mget", "cache returned a mismatched slot count");
            return unique;
        }
        Err(err) => {
            counter!("quill_cache_error_total", "op" => "mget").increment(1);
            warn!(kind, backend = cache.backend(), keys = keys.len(), error = %err, op = "mget", "cache multi-get failed");
            return unique;
        }
    };

    let mut uncached = Vec::new();
    for ((id, key), value) in unique.into_iter().zip(&keys).zip(values) {
        match value.as_deref().map(decode::<T>) {
            Some(Ok(entity)) => {
                found.insert(id, entity);
            }
            Some(Err(err)) => {
                warn!(kind, key = %key, error = %err, op = "decode", "discarding undecodable cache entry");
                uncached.push(id);
            }
            None => uncached.push(id),
        }
    }

    counter!("quill_cache_hit_total", "kind" => kind).increment(found.len() as u64);
    counter!("quill_cache_miss_total", "kind" => kind).increment(uncached.len() as u64);
    uncached
}

async fn write_back<T: CacheEntity>(
    cache: &dyn CacheStore,
    rows: &[T],
    ttl: Duration,
    op_timeout: Duration,
) {
    let kind = T::KIND.as_str();
    let entries: Vec<(String, String)> = rows
        .iter()
        .filter_map(|row| match encode(row) {
            Ok(payload) => Some((T::cache_key(row.id()).to_string(), payload)),
            Err(err) => {
                warn!(kind, id = row.id(), error = %err, op = "encode", "entity could not be encoded for cache");
                None
            }
        })
        .collect();

    if entries.is_empty() {
        return;
    }

    let count = entries.len();
    if let Err(err) = with_deadline("set_many", op_timeout, cache.set_many(entries, ttl)).await {
        counter!("quill_cache_error_total", "op" => "set_many").increment(1);
        warn!(kind, backend = cache.backend(), entries = count, error = %err, op = "set_many", "cache back-fill failed");
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use crate::cache::memory::MemoryCacheStore;
    use crate::cache::store::CacheError;

    use super::*;

    #[derive(Default)]
    struct FakeTags {
        rows: Vec<TagRecord>,
        calls: Mutex<Vec<Vec<i32>>>,
    }

    #[async_trait]
    impl TagsRepo for FakeTags {
        async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<TagRecord>, RepoError> {
            self.calls.lock().expect("calls").push(ids.to_vec());
            Ok(self
                .rows
                .iter()
                .filter(|row| ids.contains(&row.id))
                .cloned()
                .collect())
        }

        async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError> {
            Ok(self.rows.clone())
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        fn backend(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Connection("refused".to_string()))
        }

        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
            Err(CacheError::Connection("refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Connection("refused".to_string()))
        }

        async fn set_many(
            &self,
            _entries: Vec<(String, String)>,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Connection("refused".to_string()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
            Err(CacheError::Connection("refused".to_string()))
        }
    }

    /// Accepts every command and never answers.
    struct StalledCache;

    #[async_trait]
    impl CacheStore for StalledCache {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }

        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
            std::future::pending().await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn set_many(
            &self,
            _entries: Vec<(String, String)>,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
            std::future::pending().await
        }
    }

    fn tag(id: i32) -> TagRecord {
        TagRecord {
            id,
            name: format!("tag-{id}"),
            color: Some("#ff6600".to_string()),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn repo(ids: &[i32]) -> Arc<FakeTags> {
        Arc::new(FakeTags {
            rows: ids.iter().copied().map(tag).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn loader(repo: &Arc<FakeTags>, cache: Option<Arc<dyn CacheStore>>) -> TagBatchLoader {
        BatchLoader::new(
            repo.clone() as Arc<dyn TagsRepo>,
            cache,
            Duration::from_secs(60),
        )
    }

    fn memory() -> Arc<MemoryCacheStore> {
        Arc::new(MemoryCacheStore::new(NonZeroUsize::new(64).expect("non-zero")))
    }

    #[test]
    fn extend_unique_keeps_first_seen_order() {
        let mut ids = vec![3];
        extend_unique(&mut ids, [5, 3, 5, 7, 5]);
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[tokio::test]
    async fn duplicate_ids_cost_one_round_trip() {
        let repo = repo(&[5, 7]);
        let loader = loader(&repo, None);

        let found = loader.batch_get(&[5, 5, 5, 7]).await.expect("batch");

        assert_eq!(found.len(), 2);
        assert_eq!(*repo.calls.lock().expect("calls"), vec![vec![5, 7]]);
    }

    #[tokio::test]
    async fn cached_ids_skip_the_source() {
        let repo = repo(&[1, 2, 3]);
        let cache = memory();
        let loader = loader(&repo, Some(cache.clone() as Arc<dyn CacheStore>));

        let cold = loader.batch_get(&[1, 2]).await.expect("cold");
        let warm = loader.batch_get(&[1, 2, 3]).await.expect("warm");

        assert_eq!(cold.get(&1), warm.get(&1));
        assert_eq!(warm.len(), 3);
        assert_eq!(
            *repo.calls.lock().expect("calls"),
            vec![vec![1, 2], vec![3]]
        );
        assert!(cache.contains_key("quill:tag:3"));
    }

    #[tokio::test]
    async fn unknown_ids_are_absent_not_errors() {
        let repo = repo(&[1]);
        let loader = loader(&repo, Some(memory() as Arc<dyn CacheStore>));

        let found = loader.batch_get(&[1, 404]).await.expect("batch");

        assert!(found.contains_key(&1));
        assert!(!found.contains_key(&404));
        assert_eq!(loader.get(404).await.expect("single"), None);
    }

    #[tokio::test]
    async fn failing_cache_degrades_to_source() {
        let repo = repo(&[1, 2]);
        let loader = loader(&repo, Some(Arc::new(BrokenCache) as Arc<dyn CacheStore>));

        let found = loader.batch_get(&[2, 1]).await.expect("batch");

        assert_eq!(found.len(), 2);
        assert_eq!(*repo.calls.lock().expect("calls"), vec![vec![2, 1]]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_cache_times_out_into_a_source_fetch() {
        let repo = repo(&[1, 2]);
        let loader = loader(&repo, Some(Arc::new(StalledCache) as Arc<dyn CacheStore>))
            .with_op_timeout(Duration::from_millis(40));
        let started = tokio::time::Instant::now();

        let found = loader.batch_get(&[1, 2]).await.expect("batch");

        assert_eq!(found.len(), 2);
        assert_eq!(*repo.calls.lock().expect("calls"), vec![vec![1, 2]]);
        // One deadline for the read and one for the back-fill.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn corrupt_entries_are_refetched_and_overwritten() {
        let repo = repo(&[9]);
        let cache = memory();
        cache
            .set("quill:tag:9", "{oops".to_string(), Duration::from_secs(60))
            .await
            .expect("seed");
        let loader = loader(&repo, Some(cache.clone() as Arc<dyn CacheStore>));

        let found = loader.batch_get(&[9]).await.expect("batch");

        assert_eq!(found.get(&9), Some(&tag(9)));
        let payload = cache.get("quill:tag:9").await.expect("get").expect("entry");
        assert_eq!(decode::<TagRecord>(&payload).expect("decode"), tag(9));
    }

    #[tokio::test]
    async fn empty_input_does_no_work() {
        let repo = repo(&[]);
        let loader = loader(&repo, None);

        assert!(loader.batch_get(&[]).await.expect("batch").is_empty());
        assert!(repo.calls.lock().expect("calls").is_empty());
    }
}
