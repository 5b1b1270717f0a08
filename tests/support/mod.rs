#![allow(dead_code)]

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quill::application::repos::{
    CategoriesRepo, CategoriesWriteRepo, CategoryParams, CategoryQueryFilter, PostTagsRepo,
    RepoError, TagParams, TagsRepo, TagsWriteRepo,
};
use quill::cache::{
    CacheError, CacheKey, CacheStore, CategoryBatchLoader, MemoryCacheStore, TagBatchLoader,
    encode,
};
use quill::domain::entities::{CategoryRecord, PostRecord, PostTagRecord, TagRecord};
use quill::domain::types::{CategoryId, PostStatus, TagId};
use quill::relations::{EngineOptions, RelationEngine};
use time::OffsetDateTime;
use tokio::sync::Notify;

pub const TTL: Duration = Duration::from_secs(600);

pub fn category(id: CategoryId) -> CategoryRecord {
    CategoryRecord {
        id,
        name: format!("Category {id}"),
        description: None,
        icon: None,
        theme: None,
        parent_id: None,
        sort_order: Some(id),
        is_active: Some(true),
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn tag(id: TagId) -> TagRecord {
    TagRecord {
        id,
        name: format!("tag-{id}"),
        color: None,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn post(n: usize, category_id: Option<CategoryId>) -> PostRecord {
    PostRecord {
        id: n as i64 + 1,
        post_id: format!("post-{n:04}"),
        user_id: "author".to_string(),
        title: format!("Post {n}"),
        summary: None,
        content: None,
        cover: None,
        category_id,
        status: PostStatus::Published,
        position: 0,
        view_count: 0,
        like_count: 0,
        published_at: Some(OffsetDateTime::UNIX_EPOCH),
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn memory_store() -> Arc<MemoryCacheStore> {
    Arc::new(MemoryCacheStore::new(
        NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
    ))
}

/// Seed the store with entity entries as the batch loaders would write them.
pub async fn seed_categories(store: &MemoryCacheStore, ids: impl IntoIterator<Item = CategoryId>) {
    let entries = ids
        .into_iter()
        .map(|id| {
            (
                CacheKey::Category(id).to_string(),
                encode(&category(id)).expect("encode category"),
            )
        })
        .collect();
    store.set_many(entries, TTL).await.expect("seed store");
}

/// Records every id batch that reached the source.
#[derive(Default)]
struct CallLog {
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<i32>>>,
}

impl CallLog {
    fn record(&self, ids: &[i32]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        self.batches.lock().expect("call log").push(sorted);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn batches(&self) -> Vec<Vec<i32>> {
        self.batches.lock().expect("call log").clone()
    }
}

#[derive(Default)]
pub struct FakeCategories {
    rows: Mutex<BTreeMap<CategoryId, CategoryRecord>>,
    lookups: CallLog,
    list_calls: AtomicUsize,
    list_delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
}

impl FakeCategories {
    pub fn with_ids(ids: impl IntoIterator<Item = CategoryId>) -> Arc<Self> {
        let fake = Self::default();
        {
            let mut rows = fake.rows.lock().expect("rows");
            for id in ids {
                rows.insert(id, category(id));
            }
        }
        Arc::new(fake)
    }

    pub fn insert(&self, record: CategoryRecord) {
        self.rows.lock().expect("rows").insert(record.id, record);
    }

    pub fn find_calls(&self) -> usize {
        self.lookups.calls()
    }

    pub fn requested(&self) -> Vec<Vec<CategoryId>> {
        self.lookups.batches()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delay_lists(&self, delay: Duration) {
        *self.list_delay.lock().expect("delay") = Some(delay);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RepoError::Persistence("categories unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CategoriesRepo for FakeCategories {
    async fn find_by_ids(&self, ids: &[CategoryId]) -> Result<Vec<CategoryRecord>, RepoError> {
        self.lookups.record(ids);
        self.check()?;
        let rows = self.rows.lock().expect("rows");
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn list_categories(
        &self,
        filter: CategoryQueryFilter,
    ) -> Result<Vec<CategoryRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().expect("delay");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        let rows = self.rows.lock().expect("rows");
        Ok(rows
            .values()
            .filter(|row| !filter.active_only || row.active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CategoriesWriteRepo for FakeCategories {
    async fn create_category(&self, params: CategoryParams) -> Result<CategoryRecord, RepoError> {
        let mut rows = self.rows.lock().expect("rows");
        let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
        let record = CategoryRecord {
            name: params.name,
            parent_id: params.parent_id,
            is_active: params.is_active,
            sort_order: params.sort_order,
            ..category(id)
        };
        rows.insert(id, record.clone());
        Ok(record)
    }

    async fn update_category(
        &self,
        id: CategoryId,
        params: CategoryParams,
    ) -> Result<CategoryRecord, RepoError> {
        let mut rows = self.rows.lock().expect("rows");
        let row = rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        row.name = params.name;
        row.parent_id = params.parent_id;
        row.is_active = params.is_active;
        Ok(row.clone())
    }

    async fn delete_category(&self, id: CategoryId) -> Result<(), RepoError> {
        self.rows
            .lock()
            .expect("rows")
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

#[derive(Default)]
pub struct FakeTags {
    rows: Mutex<BTreeMap<TagId, TagRecord>>,
    lookups: CallLog,
    list_calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeTags {
    pub fn with_ids(ids: impl IntoIterator<Item = TagId>) -> Arc<Self> {
        let fake = Self::default();
        {
            let mut rows = fake.rows.lock().expect("rows");
            for id in ids {
                rows.insert(id, tag(id));
            }
        }
        Arc::new(fake)
    }

    pub fn find_calls(&self) -> usize {
        self.lookups.calls()
    }

    pub fn requested(&self) -> Vec<Vec<TagId>> {
        self.lookups.batches()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TagsRepo for FakeTags {
    async fn find_by_ids(&self, ids: &[TagId]) -> Result<Vec<TagRecord>, RepoError> {
        self.lookups.record(ids);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("tags unavailable".to_string()));
        }
        let rows = self.rows.lock().expect("rows");
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().expect("rows").values().cloned().collect())
    }
}

#[async_trait]
impl TagsWriteRepo for FakeTags {
    async fn create_tag(&self, params: TagParams) -> Result<TagRecord, RepoError> {
        let mut rows = self.rows.lock().expect("rows");
        let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
        let record = TagRecord {
            name: params.name,
            color: params.color,
            ..tag(id)
        };
        rows.insert(id, record.clone());
        Ok(record)
    }

    async fn update_tag(&self, id: TagId, params: TagParams) -> Result<TagRecord, RepoError> {
        let mut rows = self.rows.lock().expect("rows");
        let row = rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        row.name = params.name;
        row.color = params.color;
        Ok(row.clone())
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), RepoError> {
        self.rows
            .lock()
            .expect("rows")
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

/// Association rows kept in insertion order.
#[derive(Default)]
pub struct FakePostTags {
    rows: Mutex<Vec<PostTagRecord>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakePostTags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link(&self, post_id: &str, tag_ids: &[TagId]) {
        let mut rows = self.rows.lock().expect("rows");
        rows.extend(tag_ids.iter().map(|tag_id| PostTagRecord {
            post_id: post_id.to_string(),
            tag_id: *tag_id,
        }));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hold every lookup until the returned handle is notified.
    pub fn block(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().expect("gate") = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl PostTagsRepo for FakePostTags {
    async fn list_for_posts(&self, post_ids: &[String]) -> Result<Vec<PostTagRecord>, RepoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().expect("gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let rows = self.rows.lock().expect("rows");
        Ok(rows
            .iter()
            .filter(|row| post_ids.contains(&row.post_id))
            .cloned()
            .collect())
    }
}

/// A cache that accepts writes and never returns anything.
#[derive(Default)]
pub struct AlwaysMissStore {
    pub writes: AtomicUsize,
}

#[async_trait]
impl CacheStore for AlwaysMissStore {
    fn backend(&self) -> &'static str {
        "always-miss"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Ok(vec![None; keys.len()])
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        self.writes.fetch_add(entries.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Ok(0)
    }
}

/// A cache whose every command fails.
pub struct BrokenStore;

fn unreachable_server() -> CacheError {
    CacheError::Connection("connection refused".to_string())
}

#[async_trait]
impl CacheStore for BrokenStore {
    fn backend(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(unreachable_server())
    }

    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Err(unreachable_server())
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(unreachable_server())
    }

    async fn set_many(
        &self,
        _entries: Vec<(String, String)>,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(unreachable_server())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Err(unreachable_server())
    }
}

/// Accepts every command and never answers.
pub struct HangingStore;

#[async_trait]
impl CacheStore for HangingStore {
    fn backend(&self) -> &'static str {
        "hanging"
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

pub struct Fixture {
    pub categories: Arc<FakeCategories>,
    pub tags: Arc<FakeTags>,
    pub post_tags: Arc<FakePostTags>,
    pub store: Option<Arc<dyn CacheStore>>,
}

impl Fixture {
    pub fn new(
        categories: Arc<FakeCategories>,
        tags: Arc<FakeTags>,
        post_tags: Arc<FakePostTags>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            categories,
            tags,
            post_tags,
            store,
        }
    }

    pub fn category_loader(&self) -> CategoryBatchLoader {
        let source: Arc<dyn CategoriesRepo> = self.categories.clone();
        CategoryBatchLoader::new(source, self.store.clone(), TTL)
    }

    pub fn tag_loader(&self) -> TagBatchLoader {
        let source: Arc<dyn TagsRepo> = self.tags.clone();
        TagBatchLoader::new(source, self.store.clone(), TTL)
    }

    pub fn engine(&self, options: EngineOptions) -> RelationEngine {
        let post_tags: Arc<dyn PostTagsRepo> = self.post_tags.clone();
        RelationEngine::new(
            self.category_loader(),
            self.tag_loader(),
            post_tags,
            options,
        )
    }
}
