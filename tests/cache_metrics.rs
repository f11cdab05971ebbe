mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::DebuggingRecorder;
use serde_json::{Value, json};

use common::{Fixture, admin};
use restify::application::executor::{Executor, ExecutorConfig};
use restify::cache::{CacheConfig, CacheError, CacheKey, CacheStore, EntityRef, ResultCache};
use restify::domain::types::EntityId;
use restify_api_types::RawQuery;

struct UnreachableStore;

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Value>, CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn set(&self, _key: &CacheKey, _payload: Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::backend("connection refused"))
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::backend("connection refused"))
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // hit, miss and invalidation
    let cache = ResultCache::in_memory(CacheConfig::default());
    let key = CacheKey::encode(&("readOne", "catalog", 7)).expect("key");
    let entity = EntityRef::record("catalog", EntityId::Int(7));

    assert!(cache.lookup(&key).await.is_none());
    cache.store(&key, json!([{"ID": 7}]), cache.ttl()).await;
    cache.index(&entity, &key).await;
    assert!(cache.lookup(&key).await.is_some());
    assert_eq!(cache.invalidate(&entity).await, 1);

    // backend failures are counted, never raised
    let broken = ResultCache::new(CacheConfig::default(), Arc::new(UnreachableStore));
    assert!(broken.lookup(&key).await.is_none());
    broken.store(&key, json!([]), broken.ttl()).await;

    // data store timings come from the executor read path
    let fixture = Fixture::new();
    let executor = Executor::new(
        ExecutorConfig::new("catalog", Some(json!(common::CATALOG))),
        fixture.collaborators(),
        admin(),
    )
    .await
    .expect("executor should build");
    executor
        .read_many(RawQuery::default())
        .await
        .expect("read should succeed");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "restify_cache_hit_total",
        "restify_cache_miss_total",
        "restify_cache_store_error_total",
        "restify_cache_invalidated_total",
        "restify_data_query_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
