//! Executor orchestration, query normalization and the hook pipeline.

pub mod error;
pub mod executor;
pub mod hooks;
pub mod pipeline;
pub mod query;
pub mod repos;
pub mod schema;
