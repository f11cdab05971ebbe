//! Result caching for executor reads.
//!
//! - **Keys**: canonical digests of the normalized query (`CacheKey`).
//! - **Store**: any TTL-capable key-value store (`CacheStore`), with an
//!   in-process LRU implementation.
//! - **Invalidation index**: per-entity sets of dependent keys, kept in the
//!   same store, so a mutation can evict exactly what it affects.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 3600
//! capacity = 10000
//! ```

mod config;
mod error;
mod index;
mod keys;
mod result;
mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use index::InvalidationIndex;
pub use keys::{CacheKey, EntityRef};
pub use result::ResultCache;
pub use store::{CacheEntry, CacheStore, MemoryCacheStore};
