//! Turns caller-supplied query parameters into an engine-safe descriptor.
//!
//! Normalization always runs in the same order:
//!
//! 1. caller values for reserved scoping keys are dropped,
//! 2. the container filter is forced,
//! 3. the permission-check flag is forced,
//! 4. the normalizer's own filter extension runs,
//! 5. a non-empty body is stamped with the container id,
//! 6. a wildcard select is expanded with the schema's dynamic fields.

use serde::Serialize;
use serde_json::Value;

use crate::application::error::ExecutorError;
use crate::application::repos::StoreQuery;
use crate::domain::Record;
use crate::domain::schema::{Schema, WILDCARD};
use crate::domain::types::{AccessFlags, Actor};
use restify_api_types::{Navigation, OrderTerm, RawQuery};

pub const DEFAULT_CONTAINER_FIELD: &str = "IBLOCK_ID";
pub const DEFAULT_RESERVED_KEYS: [&str; 4] =
    ["IBLOCK_ID", "IBLOCK_CODE", "IBLOCK_SITE_ID", "IBLOCK_TYPE"];
pub const DEFAULT_PERMISSION_FLAG: &str = "CHECK_PERMISSIONS";

/// Filter key prefixes the data store reads as comparison operators.
const FILTER_OPERATORS: &[char] = &['!', '<', '>', '=', '%', '?', '@', '~'];

/// Which filter keys an executor owns and the values it forces into them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopingRules {
    container_field: String,
    container_id: Value,
    reserved_keys: Vec<String>,
    permission_flag: Option<(String, Value)>,
}

impl ScopingRules {
    /// Rules binding queries to `container_id` through `container_field`.
    /// A missing or empty container id is a configuration fault.
    pub fn new(
        container_field: impl Into<String>,
        container_id: Option<Value>,
    ) -> Result<Self, ExecutorError> {
        let container_field = container_field.into();
        let container_id = match container_id {
            None | Some(Value::Null) => {
                return Err(ExecutorError::configuration(format!(
                    "`{container_field}` is required"
                )));
            }
            Some(Value::String(id)) if id.trim().is_empty() => {
                return Err(ExecutorError::configuration(format!(
                    "`{container_field}` must not be empty"
                )));
            }
            Some(id) => id,
        };

        Ok(Self {
            reserved_keys: vec![container_field.clone()],
            container_field,
            container_id,
            permission_flag: None,
        })
    }

    /// Catalog defaults: `IBLOCK_*` keys reserved, `CHECK_PERMISSIONS = "Y"` forced.
    pub fn container(container_id: Option<Value>) -> Result<Self, ExecutorError> {
        Ok(Self::new(DEFAULT_CONTAINER_FIELD, container_id)?
            .reserve(DEFAULT_RESERVED_KEYS)
            .permission_flag(DEFAULT_PERMISSION_FLAG, Value::from("Y")))
    }

    pub fn reserve<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.reserved_keys.contains(&key) {
                self.reserved_keys.push(key);
            }
        }
        self
    }

    pub fn permission_flag(mut self, name: impl Into<String>, value: Value) -> Self {
        self.permission_flag = Some((name.into(), value));
        self
    }

    pub fn without_permission_flag(mut self) -> Self {
        self.permission_flag = None;
        self
    }

    pub fn container_field(&self) -> &str {
        &self.container_field
    }

    pub fn container_id(&self) -> &Value {
        &self.container_id
    }

    pub fn reserved_keys(&self) -> &[String] {
        &self.reserved_keys
    }

    pub fn has_permission_flag(&self) -> bool {
        self.permission_flag.is_some()
    }

    /// True for `key` itself and for operator-prefixed forms such as `!IBLOCK_ID`.
    fn is_reserved(&self, key: &str) -> bool {
        let bare = key.trim_start_matches(FILTER_OPERATORS);
        self.reserved_keys.iter().any(|reserved| reserved == bare)
            || self
                .permission_flag
                .as_ref()
                .is_some_and(|(flag, _)| flag == bare)
    }
}

/// A normalized query, ready for the data store and for cache keying.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDescriptor {
    pub filter: Record,
    pub order: Vec<OrderTerm>,
    pub select: Vec<String>,
    pub navigation: Navigation,
    pub body: Record,
}

impl QueryDescriptor {
    pub fn store_query(&self) -> StoreQuery {
        StoreQuery {
            filter: self.filter.clone(),
            order: self.order.clone(),
            select: self.select.clone(),
            navigation: self.navigation,
        }
    }
}

impl From<QueryDescriptor> for RawQuery {
    fn from(descriptor: QueryDescriptor) -> Self {
        Self {
            filter: descriptor.filter,
            order: descriptor.order,
            select: descriptor.select,
            navigation: descriptor.navigation,
            body: descriptor.body,
        }
    }
}

/// Template for query normalization. Implementors supply the scoping rules
/// and may add their own forced filter terms through `extend_filter`.
pub trait QueryNormalizer: Send + Sync {
    fn rules(&self) -> &ScopingRules;

    /// Runs after the scoping filters are forced.
    fn extend_filter(&self, _filter: &mut Record) {}

    fn normalize(&self, raw: RawQuery, schema: &Schema) -> QueryDescriptor {
        let rules = self.rules();

        let mut filter: Record = raw
            .filter
            .into_iter()
            .filter(|(key, _)| !rules.is_reserved(key))
            .collect();
        filter.insert(rules.container_field.clone(), rules.container_id.clone());
        if let Some((flag, value)) = &rules.permission_flag {
            filter.insert(flag.clone(), value.clone());
        }
        self.extend_filter(&mut filter);

        let mut body = raw.body;
        if !body.is_empty() {
            body.insert(rules.container_field.clone(), rules.container_id.clone());
        }

        QueryDescriptor {
            filter,
            order: raw.order,
            select: expand_select(raw.select, schema),
            navigation: raw.navigation,
            body,
        }
    }
}

/// Deduplicates `select` in first-seen order and, when it holds the
/// wildcard, appends every dynamic schema field.
pub fn expand_select(select: Vec<String>, schema: &Schema) -> Vec<String> {
    let wildcard = select.iter().any(|field| field == WILDCARD);
    let dynamic = schema
        .dynamic_fields()
        .filter(|_| wildcard)
        .map(str::to_string);

    let mut expanded: Vec<String> = Vec::with_capacity(select.len());
    for field in select.into_iter().chain(dynamic) {
        if !expanded.contains(&field) {
            expanded.push(field);
        }
    }
    expanded
}

/// Normalizer that only applies the scoping rules.
#[derive(Debug, Clone)]
pub struct ContainerScope {
    rules: ScopingRules,
}

impl ContainerScope {
    pub fn new(rules: ScopingRules) -> Self {
        Self { rules }
    }
}

impl QueryNormalizer for ContainerScope {
    fn rules(&self) -> &ScopingRules {
        &self.rules
    }
}

/// Restricts non-admin actors to records they own.
#[derive(Debug, Clone)]
pub struct OwnerScope {
    rules: ScopingRules,
    owner_field: String,
    owner: Option<i64>,
}

impl OwnerScope {
    pub fn for_actor(
        rules: ScopingRules,
        owner_field: impl Into<String>,
        actor: &Actor,
        access: AccessFlags,
    ) -> Result<Self, ExecutorError> {
        let owner = if access.admin {
            None
        } else {
            match actor.id {
                Some(id) => Some(id),
                None => {
                    return Err(ExecutorError::access_denied(
                        "anonymous actors cannot list owned records",
                    ));
                }
            }
        };

        Ok(Self {
            rules,
            owner_field: owner_field.into(),
            owner,
        })
    }

    pub fn owner(&self) -> Option<i64> {
        self.owner
    }
}

impl QueryNormalizer for OwnerScope {
    fn rules(&self) -> &ScopingRules {
        &self.rules
    }

    fn extend_filter(&self, filter: &mut Record) {
        if let Some(owner) = self.owner {
            filter.retain(|key, _| key.trim_start_matches(FILTER_OPERATORS) != self.owner_field);
            filter.insert(self.owner_field.clone(), Value::from(owner));
        }
    }
}
