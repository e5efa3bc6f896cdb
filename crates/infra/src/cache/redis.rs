//! Redis cache backend (optional).
//!
//! Uses blocking connections with a connect timeout so an unreachable Redis
//! degrades to cache misses instead of stalling callers.

use std::time::Duration;

use redis::Commands;

use super::{Cache, CacheError};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
}

impl RedisCache {
    pub fn new(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn connection(&self) -> Result<redis::Connection, CacheError> {
        self.client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl Cache for RedisCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection()?;
        conn.get(self.key(key))
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, seconds)
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        conn.del::<_, ()>(keys)
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}
