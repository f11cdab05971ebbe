//! Priority-ordered transform hooks.
//!
//! `PreMutation` hooks gate create/update/delete and can abort them.
//! `PostRead` hooks receive every successful read's records, along with the
//! method that produced them, and may rewrite them in place.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::error::ExecutorError;
use crate::domain::Record;
use crate::domain::schema::Schema;
use crate::domain::types::{Actor, ContainerRef, EntityId, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreMutation,
    PostRead,
}

/// State a hook can inspect and mutate.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub method: Method,
    pub actor: Actor,
    pub container: ContainerRef,
    pub schema: Arc<Schema>,
    /// Target of an update or delete, when known.
    pub id: Option<EntityId>,
    /// Write payload for mutations.
    pub body: Record,
    /// Result set for reads.
    pub records: Vec<Record>,
}

impl HookContext {
    pub fn new(
        method: Method,
        actor: Actor,
        container: ContainerRef,
        schema: Arc<Schema>,
    ) -> Self {
        Self {
            method,
            actor,
            container,
            schema,
            id: None,
            body: Record::new(),
            records: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: Option<EntityId>) -> Self {
        self.id = id;
        self
    }

    pub fn with_body(mut self, body: Record) -> Self {
        self.body = body;
        self
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }
}

#[async_trait]
pub trait TransformHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, context: &mut HookContext) -> Result<(), ExecutorError>;
}

#[derive(Clone)]
struct Registered {
    priority: i32,
    hook: Arc<dyn TransformHook>,
}

/// Hooks per phase, kept sorted by priority. Lower priorities run first;
/// equal priorities run in registration order.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    pre_mutation: Vec<Registered>,
    post_read: Vec<Registered>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: Phase, priority: i32, hook: Arc<dyn TransformHook>) {
        let hooks = self.hooks_mut(phase);
        let position = hooks.partition_point(|existing| existing.priority <= priority);
        hooks.insert(position, Registered { priority, hook });
    }

    /// Puts `hook` ahead of everything registered so far, at any priority.
    /// Hooks registered later at `i32::MIN` still run after it.
    pub fn register_first(&mut self, phase: Phase, hook: Arc<dyn TransformHook>) {
        self.hooks_mut(phase).insert(
            0,
            Registered {
                priority: i32::MIN,
                hook,
            },
        );
    }

    pub fn with(mut self, phase: Phase, priority: i32, hook: Arc<dyn TransformHook>) -> Self {
        self.register(phase, priority, hook);
        self
    }

    /// Run every hook of `phase` in order, stopping at the first error.
    pub async fn run(
        &self,
        phase: Phase,
        mut context: HookContext,
    ) -> Result<HookContext, ExecutorError> {
        for registered in self.hooks(phase) {
            registered.hook.apply(&mut context).await.inspect_err(|err| {
                debug!(
                    hook = registered.hook.name(),
                    method = %context.method,
                    error = %err,
                    "transform hook aborted the operation"
                );
            })?;
        }
        Ok(context)
    }

    /// Hook names of `phase`, in execution order.
    pub fn names(&self, phase: Phase) -> Vec<&'static str> {
        self.hooks(phase)
            .iter()
            .map(|registered| registered.hook.name())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_mutation.is_empty() && self.post_read.is_empty()
    }

    fn hooks(&self, phase: Phase) -> &[Registered] {
        match phase {
            Phase::PreMutation => &self.pre_mutation,
            Phase::PostRead => &self.post_read,
        }
    }

    fn hooks_mut(&mut self, phase: Phase) -> &mut Vec<Registered> {
        match phase {
            Phase::PreMutation => &mut self.pre_mutation,
            Phase::PostRead => &mut self.post_read,
        }
    }
}
