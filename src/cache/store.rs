//! Cache store abstraction.
//!
//! Values cross the store boundary as JSON strings so the same entries can
//! be read by any process sharing the cache server.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache command `{op}` failed: {message}")]
    Command { op: &'static str, message: String },
    #[error("cache command `{op}` gave no answer within {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("cache payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn command(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Command {
            op,
            message: err.to_string(),
        }
    }
}

/// Key/value cache with TTL support.
///
/// Implementations must be safe to share across tasks. Callers treat every
/// error as a miss on reads and as best-effort on writes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend label used in logs and metrics.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// One value slot per key, in key order. Missing keys yield `None`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Write every entry with the same TTL in a single pipelined round trip.
    async fn set_many(&self, entries: Vec<(String, String)>, ttl: Duration)
    -> Result<(), CacheError>;

    /// Remove keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;
}

/// Bound one store call by `limit`. An elapsed deadline is reported as
/// [`CacheError::Timeout`] so callers take their usual miss path.
pub async fn with_deadline<T>(
    op: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| CacheError::Timeout { op, after: limit })?
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(CacheError::from)
}

pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, CacheError> {
    serde_json::from_str(payload).map_err(CacheError::from)
}
