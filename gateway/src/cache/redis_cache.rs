use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{CacheError, ResultCache};

/// Redis-backed result cache sharing one multiplexed connection.
#[derive(Clone)]
pub struct RedisResultCache {
    connection: MultiplexedConnection,
}

impl RedisResultCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        tracing::info!("Connecting to Redis");

        let client = redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Query(e.to_string()))?;

        Ok(value.filter(|v| !v.is_empty()))
    }
}
