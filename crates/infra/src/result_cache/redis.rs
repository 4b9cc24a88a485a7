//! Redis-backed result cache.
//!
//! Uses `redis::aio::ConnectionManager` for a multiplexed connection that
//! reconnects on its own; cloning the manager per call is cheap.

use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::debug;

use super::{CacheError, ResultCache};

#[derive(Clone)]
pub struct RedisResultCache {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisResultCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisResultCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("invalid redis url: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait::async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;

        debug!(key, hit = value.is_some(), "result cache read");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let ttl_secs = ttl.as_secs().max(1);

        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))?;

        debug!(key, ttl_secs, "result cache write");
        Ok(())
    }
}
