//! Collaborator traits the executor drives: data access, field discovery,
//! authorization, file lookup and pricing.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Record;
use crate::domain::schema::FieldDescriptor;
use crate::domain::types::{AccessFlags, Actor, ContainerRef, EntityId};
use restify_api_types::{Navigation, OrderTerm};

#[derive(Debug, Error)]
pub enum DataError {
    /// The store refused the payload; the detail is safe to show the caller.
    #[error("rejected by data store: {0}")]
    Rejected(String),
    #[error("record not found")]
    NotFound,
    #[error("data store failure: {0}")]
    Failure(String),
}

impl DataError {
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::Rejected(detail.into())
    }

    pub fn from_failure(err: impl std::fmt::Display) -> Self {
        Self::Failure(err.to_string())
    }
}

/// A fully normalized read handed to the data store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreQuery {
    pub filter: Record,
    pub order: Vec<OrderTerm>,
    pub select: Vec<String>,
    pub navigation: Navigation,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Records matching `query.filter`, ordered and paginated.
    async fn query(&self, query: &StoreQuery) -> Result<Vec<Record>, DataError>;

    async fn create(&self, fields: &Record) -> Result<EntityId, DataError>;

    async fn update(&self, id: &EntityId, fields: &Record) -> Result<(), DataError>;

    async fn delete(&self, id: &EntityId) -> Result<(), DataError>;

    async fn selected_row_count(&self, filter: &Record) -> Result<u64, DataError>;

    /// Open a transaction. Work done through the handle is undone by
    /// `rollback` and by dropping the handle without committing; work done
    /// by other callers in the meantime is not.
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTransaction + 'a>, DataError>;
}

/// An open data store transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn query(&mut self, query: &StoreQuery) -> Result<Vec<Record>, DataError>;

    async fn update(&mut self, id: &EntityId, fields: &Record) -> Result<(), DataError>;

    async fn delete(&mut self, id: &EntityId) -> Result<(), DataError>;

    async fn commit(self: Box<Self>) -> Result<(), DataError>;

    async fn rollback(self: Box<Self>) -> Result<(), DataError>;
}

/// Reports the custom fields an entity kind carries in a container.
#[async_trait]
pub trait FieldDiscovery: Send + Sync {
    async fn discover_dynamic_fields(
        &self,
        container: &ContainerRef,
    ) -> Result<Vec<FieldDescriptor>, DataError>;
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn access(&self, actor: &Actor, container: &ContainerRef)
    -> Result<AccessFlags, DataError>;
}

/// Metadata of a stored file, keyed the way clients receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FileDescriptor {
    pub id: i64,
    pub src: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub file_size: u64,
    pub content_type: String,
    pub original_name: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait FileResolver: Send + Sync {
    /// Ids without a stored file are simply absent from the result.
    async fn resolve(&self, ids: &[i64]) -> Result<HashMap<i64, FileDescriptor>, DataError>;
}

/// A product's price in the base price group, with the stock flags that
/// decide whether it can be bought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BasePrice {
    pub price: Option<f64>,
    pub currency: String,
    pub catalog_group_name: String,
    #[serde(with = "yes_no")]
    pub product_can_buy_zero: bool,
    #[serde(with = "yes_no")]
    pub product_negative_amount_trace: bool,
    pub product_quantity: i64,
}

impl BasePrice {
    pub fn can_buy(&self) -> bool {
        self.price.is_some_and(|price| price != 0.0)
            && (self.product_can_buy_zero
                || self.product_negative_amount_trace
                || self.product_quantity > 0)
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn base_price(&self, product: &EntityId) -> Result<Option<BasePrice>, DataError>;

    /// Price row of `product` in a named price group.
    async fn group_price(
        &self,
        product: &EntityId,
        group: &str,
    ) -> Result<Option<Record>, DataError>;
}

/// `Y`/`N` flags as the catalog stores them.
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "Y" } else { "N" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.eq_ignore_ascii_case("y"))
    }
}
