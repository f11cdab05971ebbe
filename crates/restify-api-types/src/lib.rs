//! Wire types shared by restify executors and the transports that front them.
//!
//! A transport parses an incoming request into [`RawQuery`] and serializes
//! executor output (records, [`Acknowledgement`], [`CountRow`]) back out.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single entity as a field-name to value mapping.
pub type Record = Map<String, Value>;

/// Sort direction of one `order` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(()),
        }
    }
}

/// One `order` term. Term order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderTerm {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderTerm {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Page-based navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Navigation {
    pub page_size: Option<u32>,
    pub page_number: Option<u32>,
}

impl Navigation {
    pub fn page(page_size: u32, page_number: u32) -> Self {
        Self {
            page_size: Some(page_size),
            page_number: Some(page_number),
        }
    }

    pub fn single() -> Self {
        Self {
            page_size: Some(1),
            page_number: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.page_size.is_none()
    }
}

/// Request parameters as parsed by the transport, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawQuery {
    pub filter: Record,
    pub order: Vec<OrderTerm>,
    pub select: Vec<String>,
    pub navigation: Navigation,
    pub body: Record,
}

impl RawQuery {
    pub fn with_filter(filter: Record) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Success record returned by mutations that have no entity to echo back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    pub message: String,
}

impl Acknowledgement {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// The single row produced by a `count` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRow {
    pub count: u64,
}

impl CountRow {
    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        record.insert("count".to_string(), Value::from(self.count));
        record
    }

    /// Read a count back out of a record produced by [`CountRow::into_record`].
    pub fn from_record(record: &Record) -> Option<Self> {
        record
            .get("count")
            .and_then(Value::as_u64)
            .map(|count| Self { count })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn raw_query_deserializes_with_defaults() {
        let query: RawQuery = serde_json::from_value(json!({
            "filter": {"ACTIVE": "Y"},
            "order": [{"field": "SORT", "direction": "DESC"}]
        }))
        .expect("valid query");

        assert_eq!(query.filter.get("ACTIVE"), Some(&json!("Y")));
        assert_eq!(query.order, vec![OrderTerm::new("SORT", SortDirection::Desc)]);
        assert!(query.select.is_empty());
        assert!(query.navigation.is_unbounded());
        assert!(query.body.is_empty());
    }

    #[test]
    fn sort_direction_parses_case_insensitively() {
        assert_eq!("asc".parse::<SortDirection>(), Ok(SortDirection::Asc));
        assert_eq!("Desc".parse::<SortDirection>(), Ok(SortDirection::Desc));
        assert!("sideways".parse::<SortDirection>().is_err());
    }

    #[test]
    fn count_row_survives_record_form() {
        let record = CountRow { count: 7 }.into_record();
        assert_eq!(record.get("count"), Some(&json!(7)));
        assert_eq!(CountRow::from_record(&record), Some(CountRow { count: 7 }));
    }
}
