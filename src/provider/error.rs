//! Failure taxonomy surfaced by provider adapters.
//!
//! Messages carried by these variants are safe to show to clients: adapters
//! never embed upstream URLs, credentials, or raw transport errors in them.
//! The raw error is logged at the point of classification instead.

use crate::core::error_types::{
    ERROR_TYPE_AUTHENTICATION, ERROR_TYPE_CONNECTION, ERROR_TYPE_PROVIDER, ERROR_TYPE_RATE_LIMIT,
    ERROR_TYPE_TIMEOUT, ERROR_TYPE_UNEXPECTED,
};
use thiserror::Error;

const MAX_PROVIDER_MESSAGE_LEN: usize = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected our credentials (401/403).
    #[error("Provider authentication failed")]
    AuthenticationFailure,

    /// The provider throttled the request (429).
    #[error("Provider rate limit exceeded")]
    RateLimited {
        /// Seconds to wait before retrying, when the provider supplied a hint
        retry_after_secs: Option<u64>,
    },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Connection to provider failed: {0}")]
    ConnectionFailure(String),

    /// Non-success status from the provider that is not covered above.
    #[error("Provider returned an error (status {status}): {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Unexpected provider failure: {0}")]
    UnexpectedFailure(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status from the provider.
    ///
    /// `message` is the provider's own error message, if it could be parsed.
    pub fn from_status(
        status: u16,
        code: Option<String>,
        message: Option<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailure,
            429 => Self::RateLimited { retry_after_secs },
            408 | 504 => Self::Timeout,
            _ => Self::Upstream {
                status,
                code,
                message: truncate_message(
                    message.as_deref().unwrap_or("provider returned no error message"),
                ),
            },
        }
    }

    /// Classify a transport error from the HTTP client.
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::ConnectionFailure("failed to connect to upstream provider".to_string())
        } else if error.is_body() || error.is_decode() {
            Self::ConnectionFailure("upstream response body was interrupted".to_string())
        } else {
            Self::UnexpectedFailure("upstream request failed".to_string())
        }
    }

    /// Stable error type label used in envelopes, logs, and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => ERROR_TYPE_AUTHENTICATION,
            Self::RateLimited { .. } => ERROR_TYPE_RATE_LIMIT,
            Self::Timeout => ERROR_TYPE_TIMEOUT,
            Self::ConnectionFailure(_) => ERROR_TYPE_CONNECTION,
            Self::Upstream { .. } => ERROR_TYPE_PROVIDER,
            Self::UnexpectedFailure(_) => ERROR_TYPE_UNEXPECTED,
        }
    }
}

pub(crate) fn truncate_message(message: &str) -> String {
    let mut chars = message.chars();
    let truncated: String = chars.by_ref().take(MAX_PROVIDER_MESSAGE_LEN).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
