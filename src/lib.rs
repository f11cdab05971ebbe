//! Schema-driven REST executors.
//!
//! An [`application::executor::Executor`] serves one entity kind inside one
//! container: it normalizes incoming queries, runs transform hooks around the
//! data store and keeps an invalidating result cache in front of reads.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
mod util;

pub use application::error::ExecutorError;
pub use application::executor::{Collaborators, Executor, ExecutorConfig};
