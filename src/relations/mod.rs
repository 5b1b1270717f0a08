//! Relation loading for post batches.
//!
//! A batch of posts fans out to one loader per relation kind. Loaders write
//! into shared per-episode [`RelationMaps`], and the assembler joins those
//! maps back onto the posts in input order.

mod assembly;
mod coordinator;
mod engine;
mod loader;
mod maps;

use std::time::Duration;

use thiserror::Error;

use crate::application::repos::RepoError;

pub use assembly::{
    AssemblyOptions, DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_THRESHOLD, PostView, PostViewBuilder,
};
pub use coordinator::LoadCoordinator;
pub use engine::{EngineOptions, RelationEngine};
pub use loader::{CategoryLoader, LoadWork, RelationLoader, TagLoader};
pub use maps::{RelationMaps, RelationView};

#[derive(Debug, Clone, Error)]
pub enum RelationError {
    #[error("{loader} relation loading failed: {source}")]
    Load {
        loader: &'static str,
        #[source]
        source: RepoError,
    },
    #[error("relation loading was cancelled")]
    Cancelled,
    #[error("relation loading timed out after {0:?}")]
    TimedOut(Duration),
    #[error("relation loader task failed: {message}")]
    TaskFailed { message: String },
}

impl RelationError {
    pub fn load(loader: &'static str, source: RepoError) -> Self {
        Self::Load { loader, source }
    }

    /// The backing-store error behind a loader failure, if any.
    pub fn repo_error(&self) -> Option<&RepoError> {
        match self {
            Self::Load { source, .. } => Some(source),
            _ => None,
        }
    }
}
