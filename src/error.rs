//! Typed errors, stable response codes and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::Envelope;

/// Stable numeric codes carried in the `code` field of every response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Code {
    Success = 0,
    InvalidParam = 1001,
    NotFound = 1002,
    StorageFailure = 1003,
    Failure = 1004,
    Canceled = 1005,
    ConfigError = 1006,
}

impl Code {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn status(self) -> StatusCode {
        match self {
            Code::Success => StatusCode::OK,
            Code::InvalidParam => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Failure => StatusCode::BAD_REQUEST,
            Code::Canceled => StatusCode::REQUEST_TIMEOUT,
            Code::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failure reported by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend: {0}")]
    Backend(String),
}

/// Failure writing audit records. Never surfaced to the caller of a lifecycle operation.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit sink: {0}")]
    Sink(String),
    #[error("audit database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("audit serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Business rejection raised by a hook or a custom service.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
    /// Overrides the envelope code (defaults to [`Code::Failure`]).
    pub code: Option<i32>,
    /// Overrides the HTTP status (defaults to 400).
    pub status: Option<StatusCode>,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        HookError {
            message: message.into(),
            code: None,
            status: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("canceled: {0}")]
    Canceled(String),
}

impl AppError {
    /// Shorthand for a hook rejection with the default failure code.
    pub fn rejected(message: impl Into<String>) -> Self {
        AppError::Hook(HookError::new(message))
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::Config(_) => Code::ConfigError.value(),
            AppError::Validation(_) => Code::InvalidParam.value(),
            AppError::NotFound(_) => Code::NotFound.value(),
            AppError::Persistence(_) => Code::StorageFailure.value(),
            AppError::Hook(h) => h.code.unwrap_or(Code::Failure.value()),
            AppError::Canceled(_) => Code::Canceled.value(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => Code::ConfigError.status(),
            AppError::Validation(_) => Code::InvalidParam.status(),
            AppError::NotFound(_) => Code::NotFound.status(),
            AppError::Persistence(_) => Code::StorageFailure.status(),
            AppError::Hook(h) => h.status.unwrap_or(Code::Failure.status()),
            AppError::Canceled(_) => Code::Canceled.status(),
        }
    }

    /// Message placed in the envelope. Storage driver text is never exposed.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Persistence(_) => "storage operation failed".to_string(),
            AppError::Config(_) => "configuration error".to_string(),
            AppError::Hook(h) => h.message.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Persistence(e) => tracing::error!(error = %e, "persistence failure"),
            AppError::Config(e) => tracing::error!(error = %e, "configuration failure"),
            other => tracing::debug!(error = %other, "request failed"),
        }
        let body = Envelope::<()>::failure(self.code(), self.public_message());
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_overrides_code_and_status() {
        let err = AppError::Hook(
            HookError::new("quota exceeded")
                .with_code(4290)
                .with_status(StatusCode::TOO_MANY_REQUESTS),
        );
        assert_eq!(err.code(), 4290);
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.public_message(), "quota exceeded");
    }

    #[test]
    fn hook_defaults_to_generic_failure() {
        let err = AppError::rejected("nope");
        assert_eq!(err.code(), Code::Failure.value());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn persistence_message_hides_driver_detail() {
        let err = AppError::from(StoreError::Backend("connection reset by peer at 10.0.0.3".into()));
        assert_eq!(err.public_message(), "storage operation failed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), 1003);
    }
}
