use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::error::ExecutorError;
use crate::application::pipeline::{HookContext, TransformHook};
use crate::application::repos::{FileDescriptor, FileResolver};
use crate::domain::Record;
use crate::domain::schema::FieldType;
use crate::domain::types::Method;

/// Replaces file ids in `file`-typed fields with file descriptors. Ids the
/// resolver does not know are left as they are.
pub struct FileFormatter {
    resolver: Arc<dyn FileResolver>,
}

impl FileFormatter {
    pub fn new(resolver: Arc<dyn FileResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TransformHook for FileFormatter {
    fn name(&self) -> &'static str {
        "file_formatter"
    }

    async fn apply(&self, context: &mut HookContext) -> Result<(), ExecutorError> {
        if context.method == Method::Count {
            return Ok(());
        }

        let fields: Vec<String> = context
            .schema
            .fields_of_type(FieldType::File)
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Ok(());
        }

        let mut wanted = BTreeSet::new();
        for record in &context.records {
            for field in &fields {
                match record.get(field) {
                    Some(Value::Array(items)) => wanted.extend(items.iter().filter_map(file_id)),
                    Some(value) => wanted.extend(file_id(value)),
                    None => {}
                }
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = wanted.into_iter().collect();
        let files = self.resolver.resolve(&ids).await?;

        for record in &mut context.records {
            for field in &fields {
                format_field(record, field, &files);
            }
        }
        Ok(())
    }
}

fn format_field(record: &mut Record, field: &str, files: &HashMap<i64, FileDescriptor>) {
    let Some(value) = record.get_mut(field) else {
        return;
    };
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                format_one(item, files);
            }
        }
        single => format_one(single, files),
    }
}

fn format_one(value: &mut Value, files: &HashMap<i64, FileDescriptor>) {
    let Some(descriptor) = file_id(value).and_then(|id| files.get(&id)) else {
        return;
    };
    if let Ok(formatted) = serde_json::to_value(descriptor) {
        *value = formatted;
    }
}

fn file_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}
