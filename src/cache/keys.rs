//! Cache key derivation.
//!
//! Keys are derived from arbitrary serializable structures. Every mapping is
//! re-ordered by key (byte order) before hashing, so two structurally equal
//! inputs built along different code paths share a key. Sequences keep their
//! order: an `order` clause with swapped terms is a different query.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::CacheError;
use crate::domain::types::EntityId;

/// Opaque fixed-length (64 hex characters) cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `material`.
    pub fn encode<T: Serialize + ?Sized>(material: &T) -> Result<Self, CacheError> {
        let canonical = canonicalize(serde_json::to_value(material)?);
        let text = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(&text);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Rebuild a key from its stored string form, as kept in an index entry.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entity whose mutation must evict dependent cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum EntityRef {
    /// A single record of an entity kind.
    Record { kind: String, id: EntityId },
    /// Results that depend on the membership of a whole entity kind, such as counts.
    Collection { kind: String },
}

impl EntityRef {
    pub fn record(kind: impl Into<String>, id: EntityId) -> Self {
        Self::Record {
            kind: kind.into(),
            id,
        }
    }

    pub fn collection(kind: impl Into<String>) -> Self {
        Self::Collection { kind: kind.into() }
    }

    /// Key under which this entity's invalidation index is stored.
    pub fn index_key(&self) -> Result<CacheKey, CacheError> {
        CacheKey::encode(&("index", self))
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record { kind, id } => write!(f, "{kind}#{id}"),
            Self::Collection { kind } => write!(f, "{kind}#*"),
        }
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.as_bytes().cmp(right.as_bytes()));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        scalar => scalar,
    }
}
