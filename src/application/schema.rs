//! Builds an executor's schema once, at construction.

use tracing::debug;

use crate::application::error::ExecutorError;
use crate::application::repos::FieldDiscovery;
use crate::domain::schema::{FieldDescriptor, FieldType, Schema};
use crate::domain::types::ContainerRef;

const SOURCE: &str = "application::schema";

/// Merges a static base schema with dynamically discovered fields, then
/// applies forced overlays. Later steps win on conflicting names.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    base: Schema,
    dynamic_prefix: Option<String>,
    overlays: Vec<(String, FieldType)>,
}

impl SchemaBuilder {
    pub fn new(base: Schema) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// Discovered fields are named `<prefix><CODE>`.
    pub fn dynamic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dynamic_prefix = Some(prefix.into());
        self
    }

    pub fn overlay(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.overlays.push((name.into(), field_type));
        self
    }

    pub fn overlays<I, N>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (N, FieldType)>,
        N: Into<String>,
    {
        self.overlays
            .extend(fields.into_iter().map(|(name, ty)| (name.into(), ty)));
        self
    }

    pub async fn build(
        &self,
        discovery: &dyn FieldDiscovery,
        container: &ContainerRef,
    ) -> Result<Schema, ExecutorError> {
        let discovered = discovery.discover_dynamic_fields(container).await?;
        debug!(
            component = SOURCE,
            container = %container,
            discovered = discovered.len(),
            "dynamic fields discovered"
        );
        Ok(self.build_from(&discovered))
    }

    pub fn build_from(&self, discovered: &[FieldDescriptor]) -> Schema {
        let mut schema = self.base.clone();
        if let Some(prefix) = &self.dynamic_prefix {
            schema.set_dynamic_prefix(prefix.clone());
        }

        let prefix = self.dynamic_prefix.as_deref().unwrap_or_default();
        for field in discovered {
            let code = field.type_code();
            let field_type = FieldType::from_code(code).unwrap_or_else(|| {
                debug!(
                    component = SOURCE,
                    field = %field.code,
                    code,
                    "unknown field type code; treating as string"
                );
                FieldType::String
            });
            schema.insert(format!("{prefix}{}", field.code), field_type);
        }

        schema.extend(self.overlays.iter().map(|(name, ty)| (name.as_str(), *ty)));
        schema
    }
}
