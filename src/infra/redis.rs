//! Redis-backed [`CacheStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tracing::{debug, info};

use crate::cache::{CacheError, CacheStore, MAX_ENTRY_TTL};

/// Shares one multiplexed connection that reconnects on its own.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    /// `op_timeout` bounds both the connect handshake and every response.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Connection(err.to_string()))?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(op_timeout)
            .set_response_timeout(op_timeout);
        let manager = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|err| CacheError::Connection(err.to_string()))?;
        info!(backend = "redis", "cache store connected");
        Ok(Self { manager })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Redis rejects `EX 0`; sub-second TTLs round up to one second.
fn expiry_seconds(ttl: Duration) -> u64 {
    ttl.min(MAX_ENTRY_TTL).as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| CacheError::command("get", err))?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|err| CacheError::command("mget", err))?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection();
        let (): () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|err| CacheError::command("set", err))?;
        Ok(())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let count = entries.len();
        let seconds = expiry_seconds(ttl);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .ignore();
        }

        let mut conn = self.connection();
        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| CacheError::command("set_many", err))?;
        debug!(count, ttl_secs = seconds, "pipelined cache writes");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|err| CacheError::command("delete", err))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_never_rounds_to_zero() {
        assert_eq!(expiry_seconds(Duration::from_millis(200)), 1);
        assert_eq!(expiry_seconds(Duration::from_secs(30)), 30);
        assert_eq!(expiry_seconds(Duration::from_secs(43_200)), 43_200);
        assert_eq!(expiry_seconds(Duration::MAX), MAX_ENTRY_TTL.as_secs());
    }

    #[tokio::test]
    async fn malformed_url_is_a_connection_error() {
        let err = RedisCacheStore::connect("not a redis url", Duration::from_millis(250))
            .await
            .err()
            .expect("malformed url");

        assert!(matches!(err, CacheError::Connection(_)));
    }
}
