//! Field-name to type-tag mapping describing an entity's shape.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Select token meaning "all known fields".
pub const WILDCARD: &str = "*";

/// Canonical field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    File,
    Element,
    ElementList,
    ElementAutocomplete,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::File => "file",
            Self::Element => "element",
            Self::ElementList => "elementlist",
            Self::ElementAutocomplete => "elementautocomplete",
        }
    }

    /// Looks up a property type code, case-insensitively. Both the short
    /// codes (`S`, `N`, `F`, `E`, `EList`, `EAutocomplete`) and the
    /// canonical names are accepted.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "s" | "string" => Some(Self::String),
            "n" | "number" => Some(Self::Number),
            "f" | "file" => Some(Self::File),
            "e" | "element" => Some(Self::Element),
            "elist" | "elementlist" => Some(Self::ElementList),
            "eautocomplete" | "elementautocomplete" => Some(Self::ElementAutocomplete),
            _ => None,
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically discovered field (custom property) as reported by the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub code: String,
    pub property_type: String,
    #[serde(default)]
    pub user_type: Option<String>,
}

impl FieldDescriptor {
    pub fn new(code: impl Into<String>, property_type: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            property_type: property_type.into(),
            user_type: None,
        }
    }

    pub fn with_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.user_type = Some(user_type.into());
        self
    }

    /// The user type wins over the base property type when set.
    pub fn type_code(&self) -> &str {
        self.user_type
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.property_type)
    }
}

/// Ordered field mapping. Insertion order is preserved and re-inserting a
/// name replaces its tag in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
    dynamic_prefix: Option<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dynamic_prefix(prefix: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            dynamic_prefix: Some(prefix.into()),
        }
    }

    pub fn from_fields<I, N>(fields: I) -> Self
    where
        I: IntoIterator<Item = (N, FieldType)>,
        N: Into<String>,
    {
        let mut schema = Self::new();
        for (name, field_type) in fields {
            schema.insert(name, field_type);
        }
        schema
    }

    /// Last write wins.
    pub fn insert(&mut self, name: impl Into<String>, field_type: FieldType) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field_type,
            None => self.fields.push((name, field_type)),
        }
    }

    pub fn extend<I, N>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (N, FieldType)>,
        N: Into<String>,
    {
        for (name, field_type) in fields {
            self.insert(name, field_type);
        }
    }

    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, field_type)| *field_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields
            .iter()
            .map(|(name, field_type)| (name.as_str(), *field_type))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn dynamic_prefix(&self) -> Option<&str> {
        self.dynamic_prefix.as_deref()
    }

    pub fn set_dynamic_prefix(&mut self, prefix: impl Into<String>) {
        self.dynamic_prefix = Some(prefix.into());
    }

    /// Fields following the dynamic naming convention, in schema order.
    pub fn dynamic_fields(&self) -> impl Iterator<Item = &str> {
        let prefix = self.dynamic_prefix.as_deref();
        self.names()
            .filter(move |name| prefix.is_some_and(|prefix| name.starts_with(prefix)))
    }

    pub fn fields_of_type(&self, wanted: FieldType) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(move |(_, field_type)| *field_type == wanted)
            .map(|(name, _)| name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
