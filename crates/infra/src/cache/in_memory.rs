//! Process-local cache with lazy expiry.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::{Cache, CacheError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// `RwLock<HashMap>` cache. Expired entries are dropped when next read.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("cache lock poisoned".to_string())
}

impl Cache for InMemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(poisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", Duration::from_secs(60)).unwrap();
        cache.set("b", "2", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("a").unwrap().as_deref(), Some("1"));

        cache.del(&["a".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", Duration::ZERO).unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
        assert!(cache.is_empty());
    }
}
