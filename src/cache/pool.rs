//! Reusable scratch containers for relation loading.
//!
//! Pools only save allocations. A pool built with `max_idle = 0` never
//! retains anything and hands out fresh containers every time.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::domain::entities::{CategoryRecord, TagRecord};
use crate::domain::types::{CategoryId, TagId};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::pool";

/// A container that can be emptied in place for reuse.
pub trait Recycle: Default + Send {
    fn reset(&mut self);
}

impl<T: Send> Recycle for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K, V, S> Recycle for HashMap<K, V, S>
where
    K: Eq + Hash + Send,
    V: Send,
    S: BuildHasher + Default + Send,
{
    fn reset(&mut self) {
        self.clear();
    }
}

pub struct ObjectPool<T: Recycle> {
    name: &'static str,
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Recycle> ObjectPool<T> {
    pub fn new(name: &'static str, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            idle: Mutex::new(Vec::new()),
            max_idle,
        })
    }

    pub fn noop(name: &'static str) -> Arc<Self> {
        Self::new(name, 0)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take an empty container, recycled when one is idle.
    pub fn acquire(self: &Arc<Self>) -> Pooled<T> {
        let recycled = if self.max_idle == 0 {
            None
        } else {
            mutex_lock(&self.idle, SOURCE, "acquire").pop()
        };
        Pooled {
            item: recycled.unwrap_or_default(),
            pool: Arc::clone(self),
        }
    }

    /// Reset `item` and keep it for reuse if the pool has room.
    pub fn release(&self, mut item: T) {
        item.reset();
        if self.max_idle == 0 {
            return;
        }
        let mut idle = mutex_lock(&self.idle, SOURCE, "release");
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }

    pub fn idle_len(&self) -> usize {
        mutex_lock(&self.idle, SOURCE, "idle_len").len()
    }
}

/// Container on loan from an [`ObjectPool`]; returned when dropped.
pub struct Pooled<T: Recycle> {
    item: T,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Recycle> Pooled<T> {
    /// Detach the container from the pool.
    pub fn into_inner(mut self) -> T {
        std::mem::take(&mut self.item)
    }
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        let item = std::mem::take(&mut self.item);
        self.pool.release(item);
    }
}

pub type CategoryMap = HashMap<CategoryId, CategoryRecord>;
pub type PostTagMap = HashMap<String, Vec<TagRecord>>;

/// Pools for every scratch shape used by a loading episode.
#[derive(Clone)]
pub struct RelationPools {
    pub category_ids: Arc<ObjectPool<Vec<CategoryId>>>,
    pub tag_ids: Arc<ObjectPool<Vec<TagId>>>,
    pub post_ids: Arc<ObjectPool<Vec<String>>>,
    pub categories_by_id: Arc<ObjectPool<CategoryMap>>,
    pub tags_by_post: Arc<ObjectPool<PostTagMap>>,
}

impl RelationPools {
    pub fn new(max_idle: usize) -> Self {
        Self {
            category_ids: ObjectPool::new("category_ids", max_idle),
            tag_ids: ObjectPool::new("tag_ids", max_idle),
            post_ids: ObjectPool::new("post_ids", max_idle),
            categories_by_id: ObjectPool::new("categories_by_id", max_idle),
            tags_by_post: ObjectPool::new("tags_by_post", max_idle),
        }
    }

    pub fn noop() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_containers_come_back_empty() {
        let pool: Arc<ObjectPool<Vec<i32>>> = ObjectPool::new("ids", 4);
        {
            let mut ids = pool.acquire();
            ids.extend([1, 2, 3]);
        }
        assert_eq!(pool.idle_len(), 1);

        let ids = pool.acquire();
        assert!(ids.is_empty());
        assert!(ids.capacity() >= 3);
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool: Arc<ObjectPool<Vec<i32>>> = ObjectPool::new("ids", 1);
        let first = pool.acquire();
        let second = pool.acquire();
        drop(first);
        drop(second);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn noop_pool_never_retains() {
        let pool: Arc<ObjectPool<CategoryMap>> = ObjectPool::noop("categories");
        {
            let mut map = pool.acquire();
            map.insert(
                1,
                CategoryRecord {
                    id: 1,
                    name: "rust".to_string(),
                    description: None,
                    icon: None,
                    theme: None,
                    parent_id: None,
                    sort_order: None,
                    is_active: None,
                    created_at: time::OffsetDateTime::UNIX_EPOCH,
                    updated_at: time::OffsetDateTime::UNIX_EPOCH,
                },
            );
        }
        assert_eq!(pool.idle_len(), 0);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn into_inner_keeps_contents() {
        let pool: Arc<ObjectPool<Vec<String>>> = ObjectPool::new("posts", 2);
        let mut ids = pool.acquire();
        ids.push("post-1".to_string());
        assert_eq!(ids.into_inner(), vec!["post-1".to_string()]);
    }
}
