//! The generic CRUD orchestrator.
//!
//! An `Executor` is request-scoped: it is built for one actor, discovers its
//! schema once during construction and then serves any number of calls.
//! Reads go cache → data store → post-read hooks → cache; mutations run the
//! pre-mutation hooks, write inside a transaction and then invalidate what
//! they touched.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::application::error::ExecutorError;
use crate::application::hooks::PermissionGate;
use crate::application::pipeline::{HookContext, Phase, TransformHook, TransformPipeline};
use crate::application::query::{
    ContainerScope, DEFAULT_CONTAINER_FIELD, DEFAULT_PERMISSION_FLAG, DEFAULT_RESERVED_KEYS,
    OwnerScope, QueryDescriptor, QueryNormalizer, ScopingRules,
};
use crate::application::repos::{AccessPolicy, DataStore, FieldDiscovery, StoreTransaction};
use crate::application::schema::SchemaBuilder;
use crate::cache::{CacheKey, EntityRef, ResultCache};
use crate::domain::Record;
use crate::domain::schema::{FieldType, Schema, WILDCARD};
use crate::domain::types::{Actor, ContainerRef, EntityId, Method};
use restify_api_types::{Acknowledgement, CountRow, Navigation, OrderTerm, RawQuery};

const METRIC_DATA_QUERY_MS: &str = "restify_data_query_ms";

/// Everything an executor needs to know about the entity it serves.
#[derive(Clone)]
pub struct ExecutorConfig {
    pub entity_kind: String,
    pub container_id: Option<Value>,
    pub container_field: String,
    pub reserved_filter_keys: Vec<String>,
    pub permission_flag: Option<(String, Value)>,
    pub static_schema: Schema,
    /// Fields forced to the `file` type after discovery.
    pub file_fields: Vec<String>,
    pub dynamic_prefix: Option<String>,
    pub id_field: String,
    pub code_field: String,
    /// When set, actors without admin access only see records they own.
    pub owner_field: Option<String>,
    pub permission_gate: bool,
    pub default_order: Vec<OrderTerm>,
    pub default_select: Vec<String>,
    pub pipeline: TransformPipeline,
}

impl ExecutorConfig {
    /// Catalog-style defaults: `IBLOCK_*` scoping, forced permission checks,
    /// `PROPERTY_` dynamic fields and picture fields typed as files.
    pub fn new(entity_kind: impl Into<String>, container_id: Option<Value>) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            container_id,
            container_field: DEFAULT_CONTAINER_FIELD.to_string(),
            reserved_filter_keys: DEFAULT_RESERVED_KEYS.iter().map(|k| k.to_string()).collect(),
            permission_flag: Some((DEFAULT_PERMISSION_FLAG.to_string(), Value::from("Y"))),
            static_schema: Schema::new(),
            file_fields: vec!["PREVIEW_PICTURE".to_string(), "DETAIL_PICTURE".to_string()],
            dynamic_prefix: Some("PROPERTY_".to_string()),
            id_field: "ID".to_string(),
            code_field: "CODE".to_string(),
            owner_field: None,
            permission_gate: true,
            default_order: Vec::new(),
            default_select: vec![WILDCARD.to_string()],
            pipeline: TransformPipeline::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.static_schema = schema;
        self
    }

    /// Scope by `field` instead of the catalog container key. Clears the
    /// default reserved keys.
    pub fn with_container_field(mut self, field: impl Into<String>) -> Self {
        self.container_field = field.into();
        self.reserved_filter_keys = Vec::new();
        self
    }

    pub fn reserve<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.reserved_filter_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_permission_flag(mut self, name: impl Into<String>, value: Value) -> Self {
        self.permission_flag = Some((name.into(), value));
        self
    }

    pub fn without_permission_flag(mut self) -> Self {
        self.permission_flag = None;
        self
    }

    pub fn with_file_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dynamic_prefix(mut self, prefix: Option<String>) -> Self {
        self.dynamic_prefix = prefix;
        self
    }

    pub fn with_owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field = Some(field.into());
        self
    }

    pub fn without_permission_gate(mut self) -> Self {
        self.permission_gate = false;
        self
    }

    pub fn with_default_order(mut self, order: Vec<OrderTerm>) -> Self {
        self.default_order = order;
        self
    }

    pub fn with_hook(
        mut self,
        phase: Phase,
        priority: i32,
        hook: Arc<dyn TransformHook>,
    ) -> Self {
        self.pipeline.register(phase, priority, hook);
        self
    }

    fn scoping_rules(&self) -> Result<ScopingRules, ExecutorError> {
        let rules = ScopingRules::new(self.container_field.clone(), self.container_id.clone())?
            .reserve(self.reserved_filter_keys.iter().cloned());
        Ok(match &self.permission_flag {
            Some((flag, value)) => rules.permission_flag(flag.clone(), value.clone()),
            None => rules,
        })
    }

    fn schema_builder(&self) -> SchemaBuilder {
        let builder = SchemaBuilder::new(self.static_schema.clone())
            .overlays(self.file_fields.iter().map(|field| (field.as_str(), FieldType::File)));
        match &self.dynamic_prefix {
            Some(prefix) => builder.dynamic_prefix(prefix.clone()),
            None => builder,
        }
    }
}

/// External collaborators shared across executors.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DataStore>,
    pub discovery: Arc<dyn FieldDiscovery>,
    pub access: Arc<dyn AccessPolicy>,
    pub cache: Arc<ResultCache>,
}

/// Material hashed into a read's cache key.
#[derive(Serialize)]
struct ReadKey<'a> {
    call: Method,
    entity: &'a str,
    filter: &'a Record,
    order: &'a [OrderTerm],
    navigation: Navigation,
    select: &'a [String],
    groups: Option<&'a [i64]>,
}

pub struct Executor {
    kind: String,
    container: ContainerRef,
    actor: Actor,
    schema: Arc<Schema>,
    normalizer: Box<dyn QueryNormalizer>,
    pipeline: TransformPipeline,
    store: Arc<dyn DataStore>,
    cache: Arc<ResultCache>,
    id_field: String,
    code_field: String,
    container_field: String,
    default_order: Vec<OrderTerm>,
    default_select: Vec<String>,
    actor_scoped_keys: bool,
}

impl Executor {
    /// Validates the configuration, builds the schema and wires the hooks.
    /// A missing container id fails before any collaborator is called.
    pub async fn new(
        config: ExecutorConfig,
        collaborators: Collaborators,
        actor: Actor,
    ) -> Result<Self, ExecutorError> {
        let rules = config.scoping_rules()?;
        let container = ContainerRef::new(config.entity_kind.clone(), rules.container_id().clone());

        let schema = config
            .schema_builder()
            .build(collaborators.discovery.as_ref(), &container)
            .await?;

        let actor_scoped_keys = rules.has_permission_flag();
        let normalizer: Box<dyn QueryNormalizer> = match &config.owner_field {
            Some(owner_field) => {
                let access = collaborators.access.access(&actor, &container).await?;
                Box::new(OwnerScope::for_actor(
                    rules,
                    owner_field.clone(),
                    &actor,
                    access,
                )?)
            }
            None => Box::new(ContainerScope::new(rules)),
        };

        let mut pipeline = config.pipeline;
        if config.permission_gate {
            pipeline.register_first(
                Phase::PreMutation,
                Arc::new(PermissionGate::new(collaborators.access.clone())),
            );
        }

        Ok(Self {
            kind: config.entity_kind,
            container,
            actor,
            schema: Arc::new(schema),
            normalizer,
            pipeline,
            store: collaborators.store,
            cache: collaborators.cache,
            id_field: config.id_field,
            code_field: config.code_field,
            container_field: config.container_field,
            default_order: config.default_order,
            default_select: config.default_select,
            actor_scoped_keys,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn entity_kind(&self) -> &str {
        &self.kind
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    #[instrument(skip(self, query), fields(entity = %self.kind))]
    pub async fn read_many(&self, query: RawQuery) -> Result<Vec<Record>, ExecutorError> {
        self.read(Method::ReadMany, query).await
    }

    /// Numeric ids match the id field, anything else matches the code field.
    #[instrument(skip(self), fields(entity = %self.kind))]
    pub async fn read_one(&self, id: EntityId) -> Result<Record, ExecutorError> {
        let mut query = RawQuery::with_filter(self.id_filter(&id));
        query.navigation = Navigation::single();

        self.read(Method::ReadOne, query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ExecutorError::not_found(format!("{} {id}", self.kind)))
    }

    /// Writes `body` and returns the stored record as read back.
    #[instrument(skip(self, body), fields(entity = %self.kind))]
    pub async fn create(&self, body: Record) -> Result<Record, ExecutorError> {
        let descriptor = self.normalize(RawQuery {
            body,
            ..Default::default()
        });
        let context = self
            .pipeline
            .run(Phase::PreMutation, self.context(Method::Create).with_body(descriptor.body))
            .await?;

        let id = self.store.create(&context.body).await?;
        info!(
            target = "application::executor::create",
            entity = %self.kind,
            id = %id,
            "record created"
        );

        self.cache.invalidate(&EntityRef::collection(&self.kind)).await;
        self.read_one(id).await
    }

    /// The target comes from `id` or, failing that, from the body's id field.
    #[instrument(skip(self, body), fields(entity = %self.kind))]
    pub async fn update(
        &self,
        id: Option<EntityId>,
        body: Record,
    ) -> Result<Record, ExecutorError> {
        let id = match id {
            Some(id) => id,
            None => match body.get(&self.id_field) {
                Some(value) => EntityId::from_value(value)?,
                None => {
                    return Err(ExecutorError::not_found(format!(
                        "{} without id",
                        self.kind
                    )));
                }
            },
        };

        let descriptor = self.normalize(RawQuery {
            body,
            ..Default::default()
        });
        let context = self
            .pipeline
            .run(
                Phase::PreMutation,
                self.context(Method::Update)
                    .with_id(Some(id.clone()))
                    .with_body(descriptor.body),
            )
            .await?;

        let mut body = context.body;
        body.remove(&self.id_field);
        body.remove(&self.container_field);

        let mut tx = self.store.begin().await?;
        let outcome = async {
            let target = self.resolve_id(tx.as_mut(), &id).await?;
            tx.update(&target, &body).await?;
            Ok::<_, ExecutorError>(target)
        }
        .await;
        let target = self.finish(Method::Update, tx, outcome).await?;
        info!(
            target = "application::executor::update",
            entity = %self.kind,
            id = %target,
            "record updated"
        );

        self.invalidate_record(&target).await;
        self.read_one(target).await
    }

    /// A one-element list acknowledging the removal.
    #[instrument(skip(self), fields(entity = %self.kind))]
    pub async fn delete(&self, id: EntityId) -> Result<Vec<Acknowledgement>, ExecutorError> {
        self.pipeline
            .run(
                Phase::PreMutation,
                self.context(Method::Delete).with_id(Some(id.clone())),
            )
            .await?;

        let mut tx = self.store.begin().await?;
        let outcome = async {
            let target = self.resolve_id(tx.as_mut(), &id).await?;
            tx.delete(&target).await?;
            Ok::<_, ExecutorError>(target)
        }
        .await;
        let target = self.finish(Method::Delete, tx, outcome).await?;
        info!(
            target = "application::executor::delete",
            entity = %self.kind,
            id = %target,
            "record deleted"
        );

        self.invalidate_record(&target).await;
        Ok(vec![Acknowledgement::success(format!(
            "{} deleted",
            self.kind
        ))])
    }

    /// A single `{count}` row for the records matching `query`.
    #[instrument(skip(self, query), fields(entity = %self.kind))]
    pub async fn count(&self, mut query: RawQuery) -> Result<Vec<Record>, ExecutorError> {
        query.select = vec![self.id_field.clone()];
        let descriptor = self.normalize(query);
        let key = self.cache_key(Method::Count, &descriptor);
        let collection = EntityRef::collection(&self.kind);

        if let Some(records) = self.cached(key.as_ref()).await {
            if let Some(key) = &key {
                self.cache.index(&collection, key).await;
            }
            return Ok(records);
        }

        let started_at = Instant::now();
        let count = self.store.selected_row_count(&descriptor.filter).await?;
        record_query_time(Method::Count, started_at);

        let context = self
            .pipeline
            .run(
                Phase::PostRead,
                self.context(Method::Count)
                    .with_records(vec![CountRow { count }.into_record()]),
            )
            .await?;

        if let Some(key) = &key {
            self.remember(key, &context.records).await;
            self.cache.index(&collection, key).await;
        }
        Ok(context.records)
    }

    async fn read(&self, method: Method, query: RawQuery) -> Result<Vec<Record>, ExecutorError> {
        let mut descriptor = self.normalize(query);
        let strip_id = self.select_id(&mut descriptor.select);
        let key = self.cache_key(method, &descriptor);

        if let Some(records) = self.cached(key.as_ref()).await {
            if let Some(key) = &key {
                self.index_records(key, &records).await;
            }
            return Ok(self.without_id(records, strip_id));
        }

        let started_at = Instant::now();
        let records = self.store.query(&descriptor.store_query()).await?;
        record_query_time(method, started_at);

        let context = self
            .pipeline
            .run(Phase::PostRead, self.context(method).with_records(records))
            .await?;

        if let Some(key) = &key {
            self.remember(key, &context.records).await;
            self.index_records(key, &context.records).await;
        }
        Ok(self.without_id(context.records, strip_id))
    }

    /// Concrete id of the single record `id` names inside this executor's
    /// scope. Zero or several matches are both `NotFound`.
    async fn resolve_id(
        &self,
        tx: &mut dyn StoreTransaction,
        id: &EntityId,
    ) -> Result<EntityId, ExecutorError> {
        let descriptor = self.normalize(RawQuery {
            filter: self.id_filter(id),
            select: vec![self.id_field.clone()],
            navigation: Navigation::page(2, 1),
            ..Default::default()
        });
        let matches = tx.query(&descriptor.store_query()).await?;

        match matches.as_slice() {
            [record] => record
                .get(&self.id_field)
                .map(EntityId::from_value)
                .transpose()?
                .ok_or_else(|| {
                    ExecutorError::internal(format!("{} record without id", self.kind))
                }),
            [] => Err(ExecutorError::not_found(format!("{} {id}", self.kind))),
            _ => Err(ExecutorError::not_found(format!(
                "{} {id} is ambiguous ({} matches)",
                self.kind,
                matches.len()
            ))),
        }
    }

    /// Commits `outcome` if it succeeded. An error rolls back exactly once
    /// and is returned unchanged.
    async fn finish<T>(
        &self,
        method: Method,
        tx: Box<dyn StoreTransaction + '_>,
        outcome: Result<T, ExecutorError>,
    ) -> Result<T, ExecutorError> {
        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        target = "application::executor::finish",
                        entity = %self.kind,
                        method = %method,
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                warn!(
                    target = "application::executor::finish",
                    entity = %self.kind,
                    method = %method,
                    error = %err,
                    "mutation rolled back"
                );
                Err(err)
            }
        }
    }

    fn normalize(&self, mut query: RawQuery) -> QueryDescriptor {
        if query.select.is_empty() {
            query.select = self.default_select.clone();
        }
        if query.order.is_empty() {
            query.order = self.default_order.clone();
        }
        self.normalizer.normalize(query, &self.schema)
    }

    fn id_filter(&self, id: &EntityId) -> Record {
        let field = if id.is_numeric() {
            &self.id_field
        } else {
            &self.code_field
        };
        let mut filter = Record::new();
        filter.insert(field.clone(), id.to_value());
        filter
    }

    fn context(&self, method: Method) -> HookContext {
        HookContext::new(
            method,
            self.actor.clone(),
            self.container.clone(),
            self.schema.clone(),
        )
    }

    fn cache_key(&self, method: Method, descriptor: &QueryDescriptor) -> Option<CacheKey> {
        if !self.cache.is_enabled() {
            return None;
        }
        let material = ReadKey {
            call: method,
            entity: &self.kind,
            filter: &descriptor.filter,
            order: &descriptor.order,
            navigation: descriptor.navigation,
            select: &descriptor.select,
            groups: self.actor_scoped_keys.then(|| self.actor.groups()),
        };
        match CacheKey::encode(&material) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(
                    target = "application::executor::cache_key",
                    entity = %self.kind,
                    error = %err,
                    "cache key could not be derived; reading uncached"
                );
                None
            }
        }
    }

    async fn cached(&self, key: Option<&CacheKey>) -> Option<Vec<Record>> {
        let value = self.cache.lookup(key?).await?;
        match serde_json::from_value(value) {
            Ok(records) => Some(records),
            Err(err) => {
                warn!(
                    target = "application::executor::cached",
                    entity = %self.kind,
                    error = %err,
                    "cached payload unreadable; recomputing"
                );
                None
            }
        }
    }

    async fn remember(&self, key: &CacheKey, records: &[Record]) {
        match serde_json::to_value(records) {
            Ok(payload) => self.cache.store(key, payload, self.cache.ttl()).await,
            Err(err) => warn!(
                target = "application::executor::remember",
                entity = %self.kind,
                error = %err,
                "result not cacheable"
            ),
        }
    }

    /// Adds the id field to a narrow select so every result can be indexed
    /// by record. Returns whether the caller left it out.
    fn select_id(&self, select: &mut Vec<String>) -> bool {
        if select.is_empty()
            || select
                .iter()
                .any(|field| field == WILDCARD || *field == self.id_field)
        {
            return false;
        }
        select.push(self.id_field.clone());
        true
    }

    fn without_id(&self, mut records: Vec<Record>, strip_id: bool) -> Vec<Record> {
        if strip_id {
            for record in &mut records {
                record.remove(&self.id_field);
            }
        }
        records
    }

    /// Every read key hangs off the collection, so any write to the entity
    /// kind evicts it, including empty and not-found results. Records with
    /// an id are indexed individually as well.
    async fn index_records(&self, key: &CacheKey, records: &[Record]) {
        self.cache
            .index(&EntityRef::collection(&self.kind), key)
            .await;
        for record in records {
            let Some(id) = record
                .get(&self.id_field)
                .and_then(|value| EntityId::from_value(value).ok())
            else {
                continue;
            };
            self.cache
                .index(&EntityRef::record(&self.kind, id), key)
                .await;
        }
    }

    async fn invalidate_record(&self, id: &EntityId) {
        self.cache
            .invalidate(&EntityRef::record(&self.kind, id.clone()))
            .await;
        self.cache
            .invalidate(&EntityRef::collection(&self.kind))
            .await;
    }
}

fn record_query_time(method: Method, started_at: Instant) {
    histogram!(METRIC_DATA_QUERY_MS, "method" => method.as_str())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}
