//! Shared constants for structured API errors and stream outcome labels.

use std::fmt;

pub const ERROR_TYPE_VALIDATION: &str = "validation_error";
pub const ERROR_TYPE_UNSUPPORTED_PROVIDER: &str = "unsupported_provider_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_TIMEOUT: &str = "timeout_error";
pub const ERROR_TYPE_CONNECTION: &str = "connection_error";
pub const ERROR_TYPE_PROVIDER: &str = "provider_error";
pub const ERROR_TYPE_UNEXPECTED: &str = "unexpected_error";
pub const ERROR_TYPE_AGGREGATION: &str = "aggregation_error";
pub const ERROR_TYPE_PERSISTENCE: &str = "persistence_error";
pub const ERROR_TYPE_NOT_FOUND: &str = "not_found";
pub const ERROR_TYPE_INTERNAL: &str = "internal_error";

pub const STREAM_OUTCOME_DONE: &str = "done";
pub const STREAM_OUTCOME_ERROR: &str = "error";
pub const STREAM_OUTCOME_CANCELLED: &str = "cancelled";

/// How a streamed turn ended, as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcomeCode {
    Done,
    Error,
    Cancelled,
}

impl StreamOutcomeCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => STREAM_OUTCOME_DONE,
            Self::Error => STREAM_OUTCOME_ERROR,
            Self::Cancelled => STREAM_OUTCOME_CANCELLED,
        }
    }
}

impl fmt::Display for StreamOutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_outcome_code_as_str() {
        assert_eq!(StreamOutcomeCode::Done.as_str(), "done");
        assert_eq!(StreamOutcomeCode::Error.as_str(), "error");
        assert_eq!(StreamOutcomeCode::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn test_stream_outcome_code_display() {
        assert_eq!(format!("{}", StreamOutcomeCode::Cancelled), "cancelled");
    }

    #[test]
    fn test_constants_match_enum_values() {
        assert_eq!(StreamOutcomeCode::Done.as_str(), STREAM_OUTCOME_DONE);
        assert_eq!(StreamOutcomeCode::Error.as_str(), STREAM_OUTCOME_ERROR);
        assert_eq!(
            StreamOutcomeCode::Cancelled.as_str(),
            STREAM_OUTCOME_CANCELLED
        );
    }
}
