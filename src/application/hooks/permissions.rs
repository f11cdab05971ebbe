use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::error::ExecutorError;
use crate::application::pipeline::{HookContext, TransformHook};
use crate::application::repos::{AccessPolicy, DataError};
use crate::domain::types::{AccessFlags, Actor, ContainerRef};

/// Pre-mutation gate: the actor needs write or admin access to the container.
pub struct PermissionGate {
    policy: Arc<dyn AccessPolicy>,
}

impl PermissionGate {
    pub fn new(policy: Arc<dyn AccessPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl TransformHook for PermissionGate {
    fn name(&self) -> &'static str {
        "permission_gate"
    }

    async fn apply(&self, context: &mut HookContext) -> Result<(), ExecutorError> {
        if context.actor.is_anonymous() {
            return Err(ExecutorError::access_denied(format!(
                "anonymous actors cannot {} in {}",
                context.method, context.container
            )));
        }

        let access = self.policy.access(&context.actor, &context.container).await?;
        if !access.can_write() {
            return Err(ExecutorError::access_denied(format!(
                "write access to {} required to {}",
                context.container, context.method
            )));
        }
        Ok(())
    }
}

/// Access letters (`R`, `W`, `X`) granted per user group. An actor holds the
/// union of its groups' grants.
#[derive(Debug, Clone, Default)]
pub struct GroupPermissions {
    grants: HashMap<i64, char>,
}

impl GroupPermissions {
    pub fn new(grants: impl IntoIterator<Item = (i64, char)>) -> Self {
        Self {
            grants: grants.into_iter().collect(),
        }
    }

    pub fn flags_for(&self, actor: &Actor) -> AccessFlags {
        actor
            .groups()
            .iter()
            .filter_map(|group| self.grants.get(group))
            .fold(AccessFlags::NONE, |acc, code| {
                acc.union(AccessFlags::from_code(*code))
            })
    }
}

#[async_trait]
impl AccessPolicy for GroupPermissions {
    async fn access(
        &self,
        actor: &Actor,
        _container: &ContainerRef,
    ) -> Result<AccessFlags, DataError> {
        Ok(self.flags_for(actor))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::schema::Schema;
    use crate::domain::types::Method;

    fn gate() -> PermissionGate {
        PermissionGate::new(Arc::new(GroupPermissions::new([
            (1, 'X'),
            (2, 'R'),
            (5, 'W'),
        ])))
    }

    fn context(actor: Actor) -> HookContext {
        HookContext::new(
            Method::Update,
            actor,
            ContainerRef::new("catalog", json!(4)),
            Arc::new(Schema::new()),
        )
    }

    #[test]
    fn grants_union_across_groups() {
        let permissions = GroupPermissions::new([(2, 'R'), (5, 'W')]);
        assert_eq!(
            permissions.flags_for(&Actor::user(9, [2, 5])),
            AccessFlags::WRITE
        );
        assert_eq!(
            permissions.flags_for(&Actor::user(9, [3])),
            AccessFlags::NONE
        );
    }

    #[tokio::test]
    async fn writers_and_admins_pass() {
        assert!(gate().apply(&mut context(Actor::user(3, [2, 5]))).await.is_ok());
        assert!(gate().apply(&mut context(Actor::user(3, [1]))).await.is_ok());
    }

    #[tokio::test]
    async fn readers_and_anonymous_are_denied() {
        let reader = gate().apply(&mut context(Actor::user(3, [2]))).await;
        assert!(matches!(reader, Err(ExecutorError::AccessDenied { .. })));

        let anonymous = gate().apply(&mut context(Actor::anonymous())).await;
        assert!(matches!(anonymous, Err(ExecutorError::AccessDenied { .. })));
    }
}
