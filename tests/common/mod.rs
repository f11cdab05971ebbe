//! Counting collaborators shared by the executor tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use restify::application::executor::Collaborators;
use restify::application::hooks::GroupPermissions;
use restify::application::repos::{
    AccessPolicy, DataError, DataStore, FieldDiscovery, StoreQuery, StoreTransaction,
};
use restify::cache::{CacheConfig, ResultCache};
use restify::domain::Record;
use restify::domain::schema::FieldDescriptor;
use restify::domain::types::{AccessFlags, Actor, ContainerRef, EntityId};
use restify::infra::memory::MemoryDataStore;

pub const CATALOG: i64 = 4;

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub query: AtomicUsize,
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
    pub count: AtomicUsize,
    pub begin: AtomicUsize,
    pub commit: AtomicUsize,
    pub rollback: AtomicUsize,
}

impl Calls {
    pub fn mutations(&self) -> usize {
        self.create.load(Ordering::SeqCst)
            + self.update.load(Ordering::SeqCst)
            + self.delete.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.query.load(Ordering::SeqCst) + self.count.load(Ordering::SeqCst) + self.mutations()
    }
}

/// `MemoryDataStore` with call counters and switchable failures.
pub struct SpyStore {
    inner: MemoryDataStore,
    pub calls: Calls,
    pub fail_delete: AtomicBool,
    last_query: Mutex<Option<StoreQuery>>,
}

impl SpyStore {
    pub fn new(inner: MemoryDataStore) -> Self {
        Self {
            inner,
            calls: Calls::default(),
            fail_delete: AtomicBool::new(false),
            last_query: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn last_query(&self) -> Option<StoreQuery> {
        self.last_query.lock().expect("last query lock").clone()
    }

    fn delete_allowed(&self) -> Result<(), DataError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(DataError::Failure("constraint violated".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for SpyStore {
    async fn query(&self, query: &StoreQuery) -> Result<Vec<Record>, DataError> {
        self.calls.query.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().expect("last query lock") = Some(query.clone());
        self.inner.query(query).await
    }

    async fn create(&self, fields: &Record) -> Result<EntityId, DataError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.inner.create(fields).await
    }

    async fn update(&self, id: &EntityId, fields: &Record) -> Result<(), DataError> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, fields).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), DataError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.delete_allowed()?;
        self.inner.delete(id).await
    }

    async fn selected_row_count(&self, filter: &Record) -> Result<u64, DataError> {
        self.calls.count.fetch_add(1, Ordering::SeqCst);
        self.inner.selected_row_count(filter).await
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTransaction + 'a>, DataError> {
        self.calls.begin.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin().await?;
        Ok(Box::new(SpyTransaction { spy: self, inner }))
    }
}

/// Counts the calls made through a `SpyStore` transaction.
struct SpyTransaction<'a> {
    spy: &'a SpyStore,
    inner: Box<dyn StoreTransaction + 'a>,
}

#[async_trait]
impl StoreTransaction for SpyTransaction<'_> {
    async fn query(&mut self, query: &StoreQuery) -> Result<Vec<Record>, DataError> {
        self.spy.calls.query.fetch_add(1, Ordering::SeqCst);
        *self.spy.last_query.lock().expect("last query lock") = Some(query.clone());
        self.inner.query(query).await
    }

    async fn update(&mut self, id: &EntityId, fields: &Record) -> Result<(), DataError> {
        self.spy.calls.update.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, fields).await
    }

    async fn delete(&mut self, id: &EntityId) -> Result<(), DataError> {
        self.spy.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.spy.delete_allowed()?;
        self.inner.delete(id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        self.spy.calls.commit.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        self.spy.calls.rollback.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}

pub struct SpyDiscovery {
    fields: Vec<FieldDescriptor>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl FieldDiscovery for SpyDiscovery {
    async fn discover_dynamic_fields(
        &self,
        _container: &ContainerRef,
    ) -> Result<Vec<FieldDescriptor>, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fields.clone())
    }
}

pub struct SpyAccess {
    policy: GroupPermissions,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AccessPolicy for SpyAccess {
    async fn access(
        &self,
        actor: &Actor,
        container: &ContainerRef,
    ) -> Result<AccessFlags, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.policy.access(actor, container).await
    }
}

/// One catalog's worth of collaborators. Group 1 administers the catalog,
/// group 2 may only read it.
pub struct Fixture {
    pub store: Arc<SpyStore>,
    pub discovery: Arc<SpyDiscovery>,
    pub access: Arc<SpyAccess>,
    pub cache: Arc<ResultCache>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryDataStore::new()
            .with_required(["NAME"])
            .with_records([
                record(json!({"ID": 7, "IBLOCK_ID": CATALOG, "CODE": "green-tea", "NAME": "Green tea", "QUANTITY": 5, "CREATED_BY": 2, "PROPERTY_COLOR": "green"})),
                record(json!({"ID": 8, "IBLOCK_ID": CATALOG, "CODE": "black-tea", "NAME": "Black tea", "QUANTITY": 2, "CREATED_BY": 1, "PROPERTY_COLOR": "black"})),
                record(json!({"ID": 41, "IBLOCK_ID": 9, "CODE": "elsewhere", "NAME": "Other catalog", "QUANTITY": 1})),
            ]);

        Self {
            store: Arc::new(SpyStore::new(store)),
            discovery: Arc::new(SpyDiscovery {
                fields: vec![
                    FieldDescriptor::new("COLOR", "S"),
                    FieldDescriptor::new("GALLERY", "F"),
                ],
                calls: AtomicUsize::new(0),
            }),
            access: Arc::new(SpyAccess {
                policy: GroupPermissions::new([(1, 'X'), (2, 'R')]),
                calls: AtomicUsize::new(0),
            }),
            cache: Arc::new(ResultCache::in_memory(CacheConfig::default())),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            discovery: self.discovery.clone(),
            access: self.access.clone(),
            cache: self.cache.clone(),
        }
    }
}

pub fn admin() -> Actor {
    Actor::user(1, [1])
}

pub fn reader() -> Actor {
    Actor::user(2, [2])
}
