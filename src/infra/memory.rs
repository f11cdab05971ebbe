//! In-process collaborators: a record store with undo-log transactions and a
//! fixed field-discovery source. Used for local development and tests.

use std::cmp::Ordering;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::application::repos::{
    DataError, DataStore, FieldDiscovery, StoreQuery, StoreTransaction,
};
use crate::domain::Record;
use crate::domain::schema::{FieldDescriptor, WILDCARD};
use crate::domain::types::{ContainerRef, EntityId};
use crate::util::lock::{read_or_recover, write_or_recover};
use restify_api_types::{OrderTerm, SortDirection};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<Record>,
    next_id: i64,
}

/// Inverse of one change made inside a transaction.
#[derive(Debug)]
enum Undo {
    Restore(Record),
    Reinsert(usize, Record),
}

/// Vec-backed `DataStore`.
///
/// Filters match loosely (`4` equals `"4"`), array values mean "any of",
/// and the `!`, `>`, `>=`, `<`, `<=` key prefixes negate or compare.
///
/// Writers are serialized: an open transaction holds the writer lock, so a
/// second `begin` (or a plain `create`, `update`, `delete`) waits for it to
/// finish. Reads never wait and may observe uncommitted changes.
pub struct MemoryDataStore {
    id_field: String,
    required: Vec<String>,
    ignored_filter_keys: Vec<String>,
    state: RwLock<MemoryState>,
    writer: Mutex<()>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self {
            id_field: "ID".to_string(),
            required: Vec::new(),
            ignored_filter_keys: vec!["CHECK_PERMISSIONS".to_string()],
            state: RwLock::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            writer: Mutex::new(()),
        }
    }

    /// Fields a created record must carry with a non-empty value.
    pub fn with_required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Seed records. Records without an id get the next free one.
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        {
            let mut state = write_or_recover(&self.state, SOURCE, "with_records");
            for mut record in records {
                match record.get(&self.id_field).and_then(Value::as_i64) {
                    Some(id) => state.next_id = state.next_id.max(id + 1),
                    None => {
                        record.insert(self.id_field.clone(), Value::from(state.next_id));
                        state.next_id += 1;
                    }
                }
                state.records.push(record);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        read_or_recover(&self.state, SOURCE, "len").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(&self, record: &Record, filter: &Record) -> bool {
        filter.iter().all(|(key, expected)| {
            if self.ignored_filter_keys.iter().any(|ignored| ignored == key) {
                return true;
            }
            let (op, field) = split_operator(key);
            let actual = record.get(field).unwrap_or(&Value::Null);
            op.test(actual, expected)
        })
    }

    fn is_record(&self, record: &Record, id: &EntityId) -> bool {
        record
            .get(&self.id_field)
            .is_some_and(|value| loose_eq(value, &id.to_value()))
    }

    fn select(&self, query: &StoreQuery) -> Vec<Record> {
        let state = read_or_recover(&self.state, SOURCE, "query");
        let mut rows: Vec<&Record> = state
            .records
            .iter()
            .filter(|record| self.matches(record, &query.filter))
            .collect();
        rows.sort_by(|left, right| compare_by(left, right, &query.order));

        let skip = match (query.navigation.page_size, query.navigation.page_number) {
            (Some(size), Some(page)) => size as usize * page.saturating_sub(1) as usize,
            _ => 0,
        };
        let take = query
            .navigation
            .page_size
            .map_or(usize::MAX, |size| size as usize);

        rows.into_iter()
            .skip(skip)
            .take(take)
            .map(|record| project(record, &query.select))
            .collect()
    }

    fn insert(&self, fields: &Record) -> Result<EntityId, DataError> {
        if let Some(missing) = self
            .required
            .iter()
            .find(|field| fields.get(*field).is_none_or(is_blank))
        {
            return Err(DataError::rejected(format!("field `{missing}` is required")));
        }

        let mut state = write_or_recover(&self.state, SOURCE, "create");
        let id = state.next_id;
        state.next_id += 1;

        let mut record = fields.clone();
        record.insert(self.id_field.clone(), Value::from(id));
        state.records.push(record);
        Ok(EntityId::Int(id))
    }

    /// Applies `fields` and returns the record as it was before.
    fn apply_update(&self, id: &EntityId, fields: &Record) -> Result<Record, DataError> {
        let mut state = write_or_recover(&self.state, SOURCE, "update");
        let record = state
            .records
            .iter_mut()
            .find(|record| self.is_record(record, id))
            .ok_or(DataError::NotFound)?;
        let previous = record.clone();
        for (key, value) in fields {
            record.insert(key.clone(), value.clone());
        }
        Ok(previous)
    }

    /// Removes the record and returns it with the position it held.
    fn apply_delete(&self, id: &EntityId) -> Result<(usize, Record), DataError> {
        let mut state = write_or_recover(&self.state, SOURCE, "delete");
        let position = state
            .records
            .iter()
            .position(|record| self.is_record(record, id))
            .ok_or(DataError::NotFound)?;
        Ok((position, state.records.remove(position)))
    }

    fn revert(&self, undo: &mut Vec<Undo>) {
        let mut state = write_or_recover(&self.state, SOURCE, "rollback");
        while let Some(step) = undo.pop() {
            match step {
                Undo::Restore(previous) => {
                    let id = previous.get(&self.id_field).cloned().unwrap_or(Value::Null);
                    let current = state.records.iter_mut().find(|record| {
                        record
                            .get(&self.id_field)
                            .is_some_and(|value| loose_eq(value, &id))
                    });
                    match current {
                        Some(record) => *record = previous,
                        None => state.records.push(previous),
                    }
                }
                Undo::Reinsert(position, record) => {
                    let position = position.min(state.records.len());
                    state.records.insert(position, record);
                }
            }
        }
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn query(&self, query: &StoreQuery) -> Result<Vec<Record>, DataError> {
        Ok(self.select(query))
    }

    async fn create(&self, fields: &Record) -> Result<EntityId, DataError> {
        let _writer = self.writer.lock().await;
        self.insert(fields)
    }

    async fn update(&self, id: &EntityId, fields: &Record) -> Result<(), DataError> {
        let _writer = self.writer.lock().await;
        self.apply_update(id, fields).map(|_| ())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), DataError> {
        let _writer = self.writer.lock().await;
        self.apply_delete(id).map(|_| ())
    }

    async fn selected_row_count(&self, filter: &Record) -> Result<u64, DataError> {
        let state = read_or_recover(&self.state, SOURCE, "selected_row_count");
        Ok(state
            .records
            .iter()
            .filter(|record| self.matches(record, filter))
            .count() as u64)
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTransaction + 'a>, DataError> {
        let writer = self.writer.lock().await;
        Ok(Box::new(MemoryTransaction {
            store: self,
            undo: Vec::new(),
            _writer: writer,
        }))
    }
}

/// Transaction over a `MemoryDataStore`. Holds the store's writer lock and
/// an undo log of its own changes; dropping it uncommitted reverts them.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryDataStore,
    undo: Vec<Undo>,
    _writer: MutexGuard<'a, ()>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction<'_> {
    async fn query(&mut self, query: &StoreQuery) -> Result<Vec<Record>, DataError> {
        Ok(self.store.select(query))
    }

    async fn update(&mut self, id: &EntityId, fields: &Record) -> Result<(), DataError> {
        let previous = self.store.apply_update(id, fields)?;
        self.undo.push(Undo::Restore(previous));
        Ok(())
    }

    async fn delete(&mut self, id: &EntityId) -> Result<(), DataError> {
        let (position, record) = self.store.apply_delete(id)?;
        self.undo.push(Undo::Reinsert(position, record));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        let mut tx = self;
        tx.undo.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        let mut tx = self;
        let store = tx.store;
        store.revert(&mut tx.undo);
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!(
                component = SOURCE,
                changes = self.undo.len(),
                "reverting uncommitted transaction"
            );
            self.store.revert(&mut self.undo);
        }
    }
}

/// Discovery source returning the same descriptors for every container.
#[derive(Debug, Clone, Default)]
pub struct StaticFieldDiscovery {
    fields: Vec<FieldDescriptor>,
}

impl StaticFieldDiscovery {
    pub fn new(fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FieldDiscovery for StaticFieldDiscovery {
    async fn discover_dynamic_fields(
        &self,
        _container: &ContainerRef,
    ) -> Result<Vec<FieldDescriptor>, DataError> {
        Ok(self.fields.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    fn test(self, actual: &Value, expected: &Value) -> bool {
        match (self, expected) {
            (Self::Eq, Value::Array(options)) => options.iter().any(|o| loose_eq(actual, o)),
            (Self::Ne, Value::Array(options)) => !options.iter().any(|o| loose_eq(actual, o)),
            (Self::Eq, _) => loose_eq(actual, expected),
            (Self::Ne, _) => !loose_eq(actual, expected),
            (Self::Gt, _) => loose_cmp(actual, expected) == Ordering::Greater,
            (Self::Ge, _) => loose_cmp(actual, expected) != Ordering::Less,
            (Self::Lt, _) => loose_cmp(actual, expected) == Ordering::Less,
            (Self::Le, _) => loose_cmp(actual, expected) != Ordering::Greater,
        }
    }
}

fn split_operator(key: &str) -> (FilterOp, &str) {
    for (prefix, op) in [
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        ("!", FilterOp::Ne),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
        ("=", FilterOp::Eq),
    ] {
        if let Some(field) = key.strip_prefix(prefix) {
            return (op, field);
        }
    }
    (FilterOp::Eq, key)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(if *flag { "Y" } else { "N" }.to_string()),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (scalar_text(left), scalar_text(right)) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn loose_cmp(left: &Value, right: &Value) -> Ordering {
    let as_number = |value: &Value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => scalar_text(left)
            .unwrap_or_default()
            .cmp(&scalar_text(right).unwrap_or_default()),
    }
}

fn compare_by(left: &Record, right: &Record, order: &[OrderTerm]) -> Ordering {
    for term in order {
        let left_value = left.get(&term.field).unwrap_or(&Value::Null);
        let right_value = right.get(&term.field).unwrap_or(&Value::Null);
        let ordering = match term.direction {
            SortDirection::Asc => loose_cmp(left_value, right_value),
            SortDirection::Desc => loose_cmp(right_value, left_value),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(record: &Record, select: &[String]) -> Record {
    if select.is_empty() || select.iter().any(|field| field == WILDCARD) {
        return record.clone();
    }
    select
        .iter()
        .filter_map(|field| {
            record
                .get(field)
                .map(|value| (field.clone(), value.clone()))
        })
        .collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use restify_api_types::Navigation;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn store() -> MemoryDataStore {
        MemoryDataStore::new().with_records([
            record(json!({"NAME": "Tea", "IBLOCK_ID": 4, "SORT": 20, "ACTIVE": "Y"})),
            record(json!({"NAME": "Coffee", "IBLOCK_ID": 4, "SORT": 10, "ACTIVE": "Y"})),
            record(json!({"NAME": "Cocoa", "IBLOCK_ID": 4, "SORT": 30, "ACTIVE": "N"})),
            record(json!({"NAME": "Other", "IBLOCK_ID": 9, "SORT": 5, "ACTIVE": "Y"})),
        ])
    }

    fn names(rows: &[Record]) -> Vec<&str> {
        rows.iter()
            .filter_map(|row| row.get("NAME").and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn filters_match_loosely_and_ignore_control_keys() {
        let rows = store()
            .query(&StoreQuery {
                filter: record(json!({"IBLOCK_ID": "4", "ACTIVE": "Y", "CHECK_PERMISSIONS": "Y"})),
                order: vec![OrderTerm::new("SORT", SortDirection::Asc)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&rows), vec!["Coffee", "Tea"]);
    }

    #[tokio::test]
    async fn operators_arrays_and_pages() {
        let store = store();
        let query = StoreQuery {
            filter: record(json!({"!ID": [4], ">=SORT": 10})),
            order: vec![OrderTerm::new("SORT", SortDirection::Desc)],
            select: vec!["NAME".into()],
            navigation: Navigation::page(2, 1),
        };
        let rows = store.query(&query).await.unwrap();
        assert_eq!(names(&rows), vec!["Cocoa", "Tea"]);
        assert_eq!(rows[0].len(), 1);

        let second = StoreQuery {
            navigation: Navigation::page(2, 2),
            ..query
        };
        assert_eq!(names(&store.query(&second).await.unwrap()), vec!["Coffee"]);
    }

    #[tokio::test]
    async fn create_assigns_ids_and_checks_required_fields() {
        let store = store().with_required(["NAME"]);
        let id = store
            .create(&record(json!({"NAME": "Mate"})))
            .await
            .unwrap();
        assert_eq!(id, EntityId::Int(5));

        let err = store.create(&record(json!({"NAME": " "}))).await.unwrap_err();
        assert!(matches!(err, DataError::Rejected(message) if message.contains("NAME")));
    }

    #[tokio::test]
    async fn rollback_reverts_only_the_transactions_own_changes() {
        let store = Arc::new(store());
        let mut tx = store.begin().await.unwrap();
        tx.update(&EntityId::Int(2), &record(json!({"NAME": "Espresso"})))
            .await
            .unwrap();
        tx.delete(&EntityId::Int(1)).await.unwrap();
        assert_eq!(store.len(), 3);

        // a plain create waits for the writer lock, then lands after rollback
        let creator = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create(&record(json!({"NAME": "Mate"}))).await })
        };
        tokio::task::yield_now().await;
        assert!(!creator.is_finished());
        tx.rollback().await.unwrap();
        assert_eq!(creator.await.unwrap().unwrap(), EntityId::Int(5));

        let rows = store.query(&StoreQuery::default()).await.unwrap();
        assert_eq!(names(&rows), vec!["Tea", "Coffee", "Cocoa", "Other", "Mate"]);
    }

    #[tokio::test]
    async fn second_transaction_waits_for_the_first() {
        let store = store();
        let mut first = store.begin().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), store.begin())
                .await
                .is_err()
        );

        first.delete(&EntityId::Int(3)).await.unwrap();
        first.commit().await.unwrap();

        let second = store.begin().await.unwrap();
        drop(second);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn dropping_an_open_transaction_reverts_it() {
        let store = store();
        {
            let mut tx = store.begin().await.unwrap();
            tx.delete(&EntityId::Int(4)).await.unwrap();
        }
        assert_eq!(store.len(), 4);
        assert!(matches!(
            store.delete(&EntityId::Int(99)).await,
            Err(DataError::NotFound)
        ));
    }
}
