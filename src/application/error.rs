use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{application::repos::DataError, domain::error::DomainError};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failure of an executor operation, by kind.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Required construction input is missing. Raised before any data access.
    #[error("executor misconfigured: {message}")]
    Configuration { message: String },
    #[error("{entity} not found")]
    NotFound { entity: String },
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },
    /// The data store or a validation hook rejected the payload.
    #[error("bad input: {message}")]
    BadInput { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ExecutorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ExecutorError::Configuration { .. } | ExecutorError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ExecutorError::NotFound { .. } => StatusCode::NOT_FOUND,
            ExecutorError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            ExecutorError::BadInput { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            ExecutorError::Configuration { .. } => "Service misconfigured",
            ExecutorError::NotFound { .. } => "Resource not found",
            ExecutorError::AccessDenied { .. } => "Access denied",
            ExecutorError::BadInput { .. } => "Request could not be processed",
            ExecutorError::Internal { .. } => "Unexpected error occurred",
        }
    }
}

impl From<DomainError> for ExecutorError {
    fn from(error: DomainError) -> Self {
        Self::bad_input(error.to_string())
    }
}

impl From<DataError> for ExecutorError {
    fn from(error: DataError) -> Self {
        match error {
            DataError::Rejected(detail) => Self::bad_input(detail),
            DataError::NotFound => Self::not_found("record"),
            DataError::Failure(detail) => Self::internal(detail),
        }
    }
}

impl IntoResponse for ExecutorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report =
            ErrorReport::from_error("application::error::ExecutorError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
