//! Error types and handling for the chat gateway.
//!
//! This module provides a unified error type [`AppError`] that wraps the
//! provider taxonomy and the gateway's own failures, and converts them into
//! the `{error, details?}` HTTP envelope.

use crate::core::error_types::{
    ERROR_TYPE_AGGREGATION, ERROR_TYPE_INTERNAL, ERROR_TYPE_NOT_FOUND, ERROR_TYPE_PERSISTENCE,
    ERROR_TYPE_UNSUPPORTED_PROVIDER, ERROR_TYPE_VALIDATION,
};
use crate::provider::ProviderError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or incomplete request, rejected before dispatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested provider is not registered
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Failure reported by a provider adapter
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A streamed reply violated the chunk protocol
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Conversation store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(error = %error, "Database operation failed");
        AppError::Persistence("database operation failed".to_string())
    }
}

impl AppError {
    /// Stable error type label, used for logs and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => ERROR_TYPE_VALIDATION,
            AppError::UnsupportedProvider(_) => ERROR_TYPE_UNSUPPORTED_PROVIDER,
            AppError::Provider(e) => e.error_type(),
            AppError::Aggregation(_) => ERROR_TYPE_AGGREGATION,
            AppError::Persistence(_) => ERROR_TYPE_PERSISTENCE,
            AppError::NotFound(_) => ERROR_TYPE_NOT_FOUND,
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                ERROR_TYPE_INTERNAL
            }
        }
    }

    /// HTTP status for the non-streaming path.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnsupportedProvider(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Provider(e) => match e {
                ProviderError::AuthenticationFailure => StatusCode::BAD_GATEWAY,
                ProviderError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ProviderError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ProviderError::ConnectionFailure(_) => StatusCode::BAD_GATEWAY,
                ProviderError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                ProviderError::UnexpectedFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Aggregation(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_)
            | AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Internal failures are not echoed verbatim.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            AppError::Provider(ProviderError::RateLimited {
                retry_after_secs: Some(secs),
            }) => Some(format!("retry after {} seconds", secs)),
            AppError::Provider(ProviderError::Upstream {
                code: Some(code), ..
            }) => Some(format!("provider error code: {}", code)),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_type = self.error_type(), "Request failed");
        } else {
            tracing::debug!(error = %self, error_type = self.error_type(), "Request rejected");
        }

        let mut body = json!({ "error": self.client_message() });
        if let Some(details) = self.details() {
            body["details"] = json!(details);
        }

        let retry_after = match &self {
            AppError::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                *retry_after_secs
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
