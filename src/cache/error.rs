use thiserror::Error;

/// Failure inside the cache layer. Never surfaced to executor callers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("cache backend failure: {message}")]
    Backend { message: String },
}

impl CacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
