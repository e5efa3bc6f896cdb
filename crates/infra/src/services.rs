//! Service wiring.
//!
//! `InventoryServices` owns the store, the cache and the three services built
//! on them. Construct one per process (or per test) and pass it down; nothing
//! here is global.

use std::sync::Arc;

use tracing::info;

use crate::cache::InventoryCache;
use crate::catalog::CatalogService;
use crate::config::InventoryConfig;
use crate::error::{InventoryError, InventoryResult};
use crate::movement_engine::MovementEngine;
use crate::query_service::QueryService;
use crate::store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore};

pub struct InventoryServices<S: InventoryStore> {
    pub store: Arc<S>,
    pub movements: MovementEngine<S>,
    pub catalog: CatalogService<S>,
    pub queries: QueryService<S>,
}

impl<S: InventoryStore> Clone for InventoryServices<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            movements: self.movements.clone(),
            catalog: self.catalog.clone(),
            queries: self.queries.clone(),
        }
    }
}

impl<S: InventoryStore> InventoryServices<S> {
    pub fn new(store: Arc<S>, cache: InventoryCache, config: &InventoryConfig) -> Self {
        Self {
            movements: MovementEngine::new(store.clone(), cache.clone()),
            catalog: CatalogService::new(store.clone(), cache.clone()),
            queries: QueryService::new(
                store.clone(),
                cache,
                config.inspection_interval_days,
                config.max_page_limit,
            ),
            store,
        }
    }
}

impl InventoryServices<InMemoryInventoryStore> {
    /// In-memory store; cache selected from `config`.
    pub fn in_memory(config: &InventoryConfig) -> InventoryResult<Self> {
        let cache = cache_from_config(config)?;
        info!("using in-memory inventory store");
        Ok(Self::new(Arc::new(InMemoryInventoryStore::new()), cache, config))
    }
}

impl InventoryServices<PostgresInventoryStore> {
    /// PostgreSQL store at `config.database_url`, schema applied on connect.
    pub async fn postgres(config: &InventoryConfig) -> InventoryResult<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| InventoryError::internal(anyhow::anyhow!("DATABASE_URL is not set")))?;

        let store = PostgresInventoryStore::connect(database_url, config.db_max_connections).await?;
        store.migrate().await?;
        info!(max_connections = config.db_max_connections, "connected to postgres inventory store");

        let cache = cache_from_config(config)?;
        Ok(Self::new(Arc::new(store), cache, config))
    }
}

/// Redis when the `redis` feature is on and `REDIS_URL` is set, else in-memory.
pub fn cache_from_config(config: &InventoryConfig) -> InventoryResult<InventoryCache> {
    #[cfg(feature = "redis")]
    if let Some(url) = config.redis_url.as_deref() {
        let backend = crate::cache::RedisCache::new(url, "gascyl:").map_err(InventoryError::internal)?;
        info!("using redis cache");
        return Ok(InventoryCache::new(Arc::new(backend), config.cache_ttl));
    }

    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is not enabled, falling back to in-memory cache");
    }

    Ok(InventoryCache::in_memory(config.cache_ttl))
}
