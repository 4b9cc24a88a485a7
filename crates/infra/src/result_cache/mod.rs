//! Ephemeral result cache (string key → string value with expiry).
//!
//! Entries are written with a plain set-with-expiry and never invalidated;
//! they simply age out.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use in_memory::InMemoryResultCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisResultCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache state poisoned")]
    Poisoned,
}

#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any existing entry, expiring `ttl` from now.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

#[async_trait::async_trait]
impl<C> ResultCache for Arc<C>
where
    C: ResultCache + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }
}
