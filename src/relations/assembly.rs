//! Joins posts with their loaded relations.

use std::num::NonZeroUsize;

use rayon::prelude::*;
use serde::Serialize;

use crate::domain::entities::{CategoryRecord, PostRecord, TagRecord};

use super::maps::{RelationMaps, RelationView};

pub const DEFAULT_PARALLEL_THRESHOLD: usize = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// A post with its category and tags resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: PostRecord,
    pub category: Option<CategoryRecord>,
    pub tags: Vec<TagRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblyOptions {
    /// Batches at least this large are assembled in parallel chunks.
    pub parallel_threshold: usize,
    pub chunk_size: NonZeroUsize,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

pub struct PostViewBuilder<'a> {
    maps: &'a RelationMaps,
    options: AssemblyOptions,
}

impl<'a> PostViewBuilder<'a> {
    pub fn new(maps: &'a RelationMaps, options: AssemblyOptions) -> Self {
        Self { maps, options }
    }

    /// Serial assembly under one read lock.
    pub fn build(&self, posts: &[PostRecord]) -> Vec<PostView> {
        let view = self.maps.read();
        posts.iter().map(|post| assemble(post, &view)).collect()
    }

    /// Chunked assembly on the rayon pool. Each chunk takes its own read lock
    /// and the output keeps input order.
    pub fn build_parallel(&self, posts: &[PostRecord]) -> Vec<PostView> {
        let chunks: Vec<Vec<PostView>> = posts
            .par_chunks(self.options.chunk_size.get())
            .map(|chunk| {
                let view = self.maps.read();
                chunk.iter().map(|post| assemble(post, &view)).collect()
            })
            .collect();
        chunks.into_iter().flatten().collect()
    }

    pub fn build_any(&self, posts: &[PostRecord]) -> Vec<PostView> {
        if posts.len() >= self.options.parallel_threshold {
            self.build_parallel(posts)
        } else {
            self.build(posts)
        }
    }
}

fn assemble(post: &PostRecord, view: &RelationView<'_>) -> PostView {
    PostView {
        post: post.clone(),
        category: view.category(post.category_id).cloned(),
        tags: view.tags(&post.post_id).to_vec(),
    }
}
