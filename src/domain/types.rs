//! Identifiers, actors and access levels shared by every executor.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DomainError;

/// Stable identifier of an entity: a numeric id or a symbolic code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Code(String),
}

impl EntityId {
    /// Strings that are canonical integers become numeric ids.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id(raw));
        }
        match trimmed.parse::<i64>() {
            Ok(id) if id.to_string() == trimmed => Ok(Self::Int(id)),
            _ => Ok(Self::Code(trimmed.to_string())),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, DomainError> {
        match value {
            Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| DomainError::invalid_id(number.to_string())),
            Value::String(raw) => Self::parse(raw),
            other => Err(DomainError::invalid_id(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(id) => Value::from(*id),
            Self::Code(code) => Value::from(code.as_str()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_))
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Code(code) => f.write_str(code),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

/// The already-authenticated caller of an executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<i64>,
    /// Sorted and deduplicated so equal actors produce equal cache keys.
    groups: Vec<i64>,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: i64, groups: impl IntoIterator<Item = i64>) -> Self {
        let mut groups: Vec<i64> = groups.into_iter().collect();
        groups.sort_unstable();
        groups.dedup();
        Self {
            id: Some(id),
            groups,
        }
    }

    pub fn groups(&self) -> &[i64] {
        &self.groups
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }
}

/// Access level an actor holds on a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFlags {
    pub read: bool,
    pub write: bool,
    pub admin: bool,
}

impl AccessFlags {
    pub const NONE: Self = Self {
        read: false,
        write: false,
        admin: false,
    };
    pub const READ: Self = Self {
        read: true,
        write: false,
        admin: false,
    };
    pub const WRITE: Self = Self {
        read: true,
        write: true,
        admin: false,
    };
    pub const ADMIN: Self = Self {
        read: true,
        write: true,
        admin: true,
    };

    /// Single-letter permission codes: `R` read, `W` write, `X` full access.
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'R' => Self::READ,
            'W' => Self::WRITE,
            'X' => Self::ADMIN,
            _ => Self::NONE,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
            admin: self.admin || other.admin,
        }
    }

    pub fn can_write(self) -> bool {
        self.write || self.admin
    }
}

/// The collection an executor is bound to, such as one catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub entity_kind: String,
    pub id: Value,
}

impl ContainerRef {
    pub fn new(entity_kind: impl Into<String>, id: Value) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            id,
        }
    }
}

impl Display for ContainerRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Value::String(id) => write!(f, "{}@{id}", self.entity_kind),
            other => write!(f, "{}@{other}", self.entity_kind),
        }
    }
}

/// Executor operation, passed to hooks so they can special-case methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Create,
    ReadOne,
    ReadMany,
    Update,
    Delete,
    Count,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::ReadOne => "readOne",
            Self::ReadMany => "readMany",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Count => "count",
        }
    }

    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
