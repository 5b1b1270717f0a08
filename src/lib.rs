//! Relation loading and caching for blog content.
//!
//! Posts are read from Postgres and joined with their category and tags
//! through batch cache-aside loaders. Whole lists are cached under fixed
//! keys with coalesced recomputation, and writes invalidate the affected
//! keys before returning.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod relations;
