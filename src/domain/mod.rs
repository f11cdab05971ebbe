//! Domain layer types and invariants.

pub mod error;
pub mod schema;
pub mod types;

pub use restify_api_types::Record;
