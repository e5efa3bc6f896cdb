//! Read-side cache.
//!
//! `Cache` is a plain string key/value store with per-entry TTL. Values are
//! JSON documents written by [`InventoryCache`], which also owns the key
//! layout and the single post-commit invalidation routine used by every
//! write path.
//!
//! Cache access is best-effort: backend failures are logged and treated as a
//! miss, never surfaced to the caller.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use gascyl_core::{CategoryId, CylinderId, CylinderTypeId};

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store with expiry.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    fn del(&self, keys: &[String]) -> Result<(), CacheError>;
}

impl<C: Cache + ?Sized> Cache for Arc<C> {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl)
    }

    fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        (**self).del(keys)
    }
}

/// Cache key layout.
pub mod keys {
    use gascyl_core::{CategoryId, CylinderId, CylinderTypeId};

    pub const CATEGORY_SUMMARY: &str = "summary:categories";
    pub const CYLINDER_SUMMARY: &str = "summary:cylinders";

    pub fn category(id: CategoryId) -> String {
        format!("category:{id}")
    }

    pub fn cylinder(id: CylinderId) -> String {
        format!("cylinder:{id}")
    }

    pub fn cylinder_type(id: CylinderTypeId) -> String {
        format!("cylinder_type:{id}")
    }
}

/// What a committed write touched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheScope {
    Category(CategoryId),
    Cylinder(CylinderId),
    CylinderType(CylinderTypeId),
}

impl CacheScope {
    /// Entity entry plus the summary it feeds.
    pub fn keys(&self) -> Vec<String> {
        match *self {
            CacheScope::Category(id) => {
                vec![keys::category(id), keys::CATEGORY_SUMMARY.to_string()]
            }
            CacheScope::Cylinder(id) => {
                vec![keys::cylinder(id), keys::CYLINDER_SUMMARY.to_string()]
            }
            CacheScope::CylinderType(id) => {
                vec![keys::cylinder_type(id), keys::CYLINDER_SUMMARY.to_string()]
            }
        }
    }
}

/// JSON view over a [`Cache`] backend with a fixed TTL.
#[derive(Clone)]
pub struct InventoryCache {
    backend: Arc<dyn Cache>,
    ttl: Duration,
}

impl std::fmt::Debug for InventoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl InventoryCache {
    pub fn new(backend: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCache::new()), ttl)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "dropping undecodable cache entry");
                if let Err(e) = self.backend.del(&[key.to_string()]) {
                    warn!(key, error = %e, "cache delete failed");
                }
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable");
                return;
            }
        };
        if let Err(e) = self.backend.set(key, &raw, self.ttl) {
            warn!(key, error = %e, "cache write failed");
        }
    }

    /// Drop every entry a committed write in `scope` may have made stale.
    pub fn invalidate(&self, scope: CacheScope) {
        let keys = scope.keys();
        match self.backend.del(&keys) {
            Ok(()) => debug!(?scope, "cache invalidated"),
            Err(e) => warn!(?scope, error = %e, "cache invalidation failed"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Backend whose every call fails.
    #[derive(Debug, Default)]
    pub struct FailingCache;

    impl Cache for FailingCache {
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        fn del(&self, _keys: &[String]) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FailingCache;
    use super::*;

    #[test]
    fn scope_keys_include_the_matching_summary() {
        let id = CategoryId::new();
        assert_eq!(
            CacheScope::Category(id).keys(),
            vec![format!("category:{id}"), keys::CATEGORY_SUMMARY.to_string()]
        );

        let type_id = CylinderTypeId::new();
        let keys = CacheScope::CylinderType(type_id).keys();
        assert!(keys.contains(&keys::CYLINDER_SUMMARY.to_string()));
    }

    #[test]
    fn json_round_trip_and_invalidate() {
        let cache = InventoryCache::in_memory(Duration::from_secs(60));
        let id = CategoryId::new();
        let key = keys::category(id);

        cache.put_json(&key, &vec![1, 2, 3]);
        assert_eq!(cache.get_json::<Vec<i32>>(&key), Some(vec![1, 2, 3]));

        cache.invalidate(CacheScope::Category(id));
        assert_eq!(cache.get_json::<Vec<i32>>(&key), None);
    }

    #[test]
    fn undecodable_entry_is_a_miss_and_removed() {
        let backend = Arc::new(InMemoryCache::new());
        let cache = InventoryCache::new(backend.clone(), Duration::from_secs(60));
        backend.set("k", "not json", Duration::from_secs(60)).unwrap();

        assert_eq!(cache.get_json::<Vec<i32>>("k"), None);
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn failing_backend_behaves_as_empty_cache() {
        let cache = InventoryCache::new(Arc::new(FailingCache), Duration::from_secs(60));
        cache.put_json("k", &1);
        assert_eq!(cache.get_json::<i32>("k"), None);
        cache.invalidate(CacheScope::Cylinder(CylinderId::new()));
    }
}
