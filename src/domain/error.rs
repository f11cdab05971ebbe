use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid entity id `{value}`")]
    InvalidId { value: String },
}

impl DomainError {
    pub fn invalid_id(value: impl Into<String>) -> Self {
        Self::InvalidId {
            value: value.into(),
        }
    }
}
