//! Read-through result cache with entity-based invalidation.
//!
//! Every failure below this point is logged and swallowed: callers always get
//! their freshly computed result, the cache only saves them work.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::index::InvalidationIndex;
use super::keys::{CacheKey, EntityRef};
use super::store::{CacheStore, MemoryCacheStore};

const SOURCE: &str = "cache::result";

const METRIC_CACHE_HIT: &str = "restify_cache_hit_total";
const METRIC_CACHE_MISS: &str = "restify_cache_miss_total";
const METRIC_CACHE_STORE_ERROR: &str = "restify_cache_store_error_total";
const METRIC_CACHE_INVALIDATED: &str = "restify_cache_invalidated_total";

pub struct ResultCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    index: InvalidationIndex,
}

impl ResultCache {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let index = InvalidationIndex::new(store.clone(), config.index_ttl);
        Self {
            config,
            store,
            index,
        }
    }

    /// Cache backed by a process-local LRU store sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryCacheStore::new(&config));
        Self::new(config, store)
    }

    pub fn disabled() -> Self {
        Self::in_memory(CacheConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Default lifetime for stored results.
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// `None` for absent, expired or unreadable entries.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }

        match self.store.get(key).await {
            Ok(Some(value)) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(component = SOURCE, key = %key, "cache hit");
                Some(value)
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(component = SOURCE, key = %key, "cache miss");
                None
            }
            Err(err) => {
                self.record_failure("lookup", &err);
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }

    /// Overwrites any existing entry.
    pub async fn store(&self, key: &CacheKey, value: Value, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        if let Err(err) = self.store.set(key, value, ttl).await {
            self.record_failure("store", &err);
        }
    }

    /// Make `key` evictable through `entity`. Idempotent.
    pub async fn index(&self, entity: &EntityRef, key: &CacheKey) {
        if !self.config.enabled {
            return;
        }
        if let Err(err) = self.index.link(entity, key).await {
            self.record_failure("index", &err);
        }
    }

    /// Evict every entry indexed under `entity` along with the index entry
    /// itself. Returns the number of keys evicted.
    pub async fn invalidate(&self, entity: &EntityRef) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let keys = match self.index.take(entity).await {
            Ok(keys) => keys,
            Err(err) => {
                self.record_failure("invalidate", &err);
                return 0;
            }
        };

        let mut evicted = 0;
        for key in &keys {
            match self.store.remove(key).await {
                Ok(()) => evicted += 1,
                Err(err) => self.record_failure("invalidate", &err),
            }
        }

        counter!(METRIC_CACHE_INVALIDATED).increment(evicted as u64);
        debug!(
            component = SOURCE,
            entity = %entity,
            evicted,
            "cache entries invalidated"
        );
        evicted
    }

    fn record_failure(&self, op: &'static str, err: &CacheError) {
        counter!(METRIC_CACHE_STORE_ERROR, "op" => op).increment(1);
        warn!(
            component = SOURCE,
            op,
            error = %err,
            "cache operation failed; continuing without cache"
        );
    }
}
