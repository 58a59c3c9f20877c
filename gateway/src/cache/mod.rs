//! Result cache populated by the backend for fire-and-forget jobs.

mod redis_cache;

pub use redis_cache::RedisResultCache;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),
    #[error("Cache query failed: {0}")]
    Query(String),
}

/// Read side of the result cache.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Fetch the raw backend output stored under `key`.
    ///
    /// `Ok(None)` means the job is still pending or the key is unknown.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
}
