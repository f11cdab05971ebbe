//! Entity → dependent cache keys.
//!
//! The index lives in the cache store itself: each entity's set of dependent
//! keys is an ordinary entry under `EntityRef::index_key`.

use std::sync::Arc;
use std::time::Duration;

use super::error::CacheError;
use super::keys::{CacheKey, EntityRef};
use super::store::CacheStore;

#[derive(Clone)]
pub struct InvalidationIndex {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl InvalidationIndex {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Idempotent.
    pub async fn link(&self, entity: &EntityRef, key: &CacheKey) -> Result<(), CacheError> {
        self.store
            .add_member(&entity.index_key()?, key.as_str(), self.ttl)
            .await
    }

    /// Remove the entity's index entry and return the keys it held.
    pub async fn take(&self, entity: &EntityRef) -> Result<Vec<CacheKey>, CacheError> {
        let members = self.store.take_members(&entity.index_key()?).await?;
        Ok(members.into_iter().map(CacheKey::from_stored).collect())
    }
}
