//! Quill cache system
//!
//! Cache-aside building blocks shared by the relation engine and the
//! application services:
//!
//! - **Entity cache**: [`BatchLoader`] resolves category and tag ids through
//!   one multi-get and one source query, back-filling misses.
//! - **List cache**: [`ListCache`] stores whole derived lists and funnels
//!   concurrent misses through the process-wide [`Coalescer`].
//! - **Invalidation**: [`CacheInvalidator`] is awaited by write paths.
//! - **Scratch pools**: [`ObjectPool`] recycles per-episode containers.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"          # redis | memory | disabled
//! redis_url = "redis://127.0.0.1:6379"
//! entity_ttl_seconds = 43200
//! list_ttl_seconds = 43200
//! count_ttl_seconds = 30
//! op_timeout_ms = 250        # a slower store command counts as a miss
//! ```

mod batch;
mod coalesce;
mod config;
mod invalidation;
mod keys;
mod list;
mod lock;
mod memory;
mod pool;
mod store;

pub use batch::{
    BatchLoader, CacheEntity, CategoryBatchLoader, EntitySource, TagBatchLoader, extend_unique,
};
pub use coalesce::Coalescer;
pub use config::{CacheBackend, CacheConfig, MAX_ENTRY_TTL};
pub use invalidation::CacheInvalidator;
pub use keys::{CacheKey, CategoryListVariant, EntityKind, KEY_PREFIX};
pub use list::ListCache;
pub use memory::MemoryCacheStore;
pub use pool::{CategoryMap, ObjectPool, PostTagMap, Pooled, Recycle, RelationPools};
pub use store::{CacheError, CacheStore, decode, encode, with_deadline};

pub(crate) use config::{
    DEFAULT_COUNT_TTL_SECS, DEFAULT_ENTITY_TTL_SECS, DEFAULT_LIST_TTL_SECS,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_OP_TIMEOUT_MS, default_op_timeout,
};
pub(crate) use lock::{rw_read, rw_write};
