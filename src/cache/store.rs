//! Key-value storage behind the result cache.
//!
//! The store is an external collaborator in production (any TTL-capable
//! key-value service). `MemoryCacheStore` is the in-process implementation
//! used by default and in tests.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use time::OffsetDateTime;

use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::CacheKey;
use crate::util::lock::{read_or_recover, write_or_recover};

const SOURCE: &str = "cache::store";

/// TTL-expiring key-value store holding JSON payloads.
///
/// Single-key operations are expected to be atomic; nothing else is.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError>;

    /// Overwrites any existing entry.
    async fn set(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), CacheError>;

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Add `member` to the string set stored under `key`, refreshing its ttl.
    /// Adding an existing member is a no-op apart from the refresh.
    async fn add_member(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut members = members_of(self.get(key).await?);
        if !members.iter().any(|existing| existing == member) {
            members.push(member.to_string());
        }
        self.set(key, Value::from(members), ttl).await
    }

    /// Remove the set stored under `key`, returning its members.
    async fn take_members(&self, key: &CacheKey) -> Result<Vec<String>, CacheError> {
        let members = members_of(self.get(key).await?);
        self.remove(key).await?;
        Ok(members)
    }
}

fn members_of(payload: Option<Value>) -> Vec<String> {
    match payload {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(member) => Some(member),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// One stored payload with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Value,
    pub stored_at: OffsetDateTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Value, ttl: Duration) -> Self {
        Self {
            key,
            payload,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now - self.stored_at >= self.ttl
    }
}

/// LRU-bounded in-process store. Expired entries are dropped lazily on read.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_payload(
        entries: &mut LruCache<CacheKey, CacheEntry>,
        key: &CacheKey,
    ) -> Option<Value> {
        let expired = entries
            .peek(key)
            .is_some_and(|entry| entry.is_expired_at(OffsetDateTime::now_utc()));
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.payload.clone())
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let mut entries = write_or_recover(&self.entries, SOURCE, "get");
        Ok(Self::live_payload(&mut entries, key))
    }

    async fn set(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<(), CacheError> {
        write_or_recover(&self.entries, SOURCE, "set")
            .put(key.clone(), CacheEntry::new(key.clone(), payload, ttl));
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        write_or_recover(&self.entries, SOURCE, "remove").pop(key);
        Ok(())
    }

    async fn add_member(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = write_or_recover(&self.entries, SOURCE, "add_member");
        let mut members = members_of(Self::live_payload(&mut entries, key));
        if !members.iter().any(|existing| existing == member) {
            members.push(member.to_string());
        }
        entries.put(
            key.clone(),
            CacheEntry::new(key.clone(), Value::from(members), ttl),
        );
        Ok(())
    }

    async fn take_members(&self, key: &CacheKey) -> Result<Vec<String>, CacheError> {
        let mut entries = write_or_recover(&self.entries, SOURCE, "take_members");
        let members = members_of(Self::live_payload(&mut entries, key));
        entries.pop(key);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::encode(name).unwrap()
    }

    #[tokio::test]
    async fn store_then_lookup_hits() {
        let store = MemoryCacheStore::default();
        store
            .set(&key("a"), json!([{"ID": 1}]), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap(), Some(json!([{"ID": 1}])));
        assert_eq!(store.get(&key("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_miss_and_are_dropped() {
        let store = MemoryCacheStore::default();
        store
            .set(&key("a"), json!(1), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get(&key("a")).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn entry_expiry_is_relative_to_stored_at() {
        let entry = CacheEntry::new(key("a"), json!(null), Duration::from_secs(10));
        assert!(!entry.is_expired_at(entry.stored_at + time::Duration::seconds(9)));
        assert!(entry.is_expired_at(entry.stored_at + time::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let config = CacheConfig {
            capacity: 2,
            ..Default::default()
        };
        let store = MemoryCacheStore::new(&config);
        let ttl = Duration::from_secs(60);
        store.set(&key("a"), json!(1), ttl).await.unwrap();
        store.set(&key("b"), json!(2), ttl).await.unwrap();
        store.get(&key("a")).await.unwrap();
        store.set(&key("c"), json!(3), ttl).await.unwrap();

        assert!(store.get(&key("a")).await.unwrap().is_some());
        assert!(store.get(&key("b")).await.unwrap().is_none());
        assert!(store.get(&key("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn member_sets_are_idempotent_and_taken_once() {
        let store = MemoryCacheStore::default();
        let ttl = Duration::from_secs(60);
        store.add_member(&key("idx"), "k1", ttl).await.unwrap();
        store.add_member(&key("idx"), "k2", ttl).await.unwrap();
        store.add_member(&key("idx"), "k1", ttl).await.unwrap();

        assert_eq!(
            store.take_members(&key("idx")).await.unwrap(),
            vec!["k1".to_string(), "k2".to_string()]
        );
        assert!(store.take_members(&key("idx")).await.unwrap().is_empty());
    }
}
