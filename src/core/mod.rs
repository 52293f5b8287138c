//! Core functionality for the chat gateway.
//!
//! Configuration, errors, logging, metrics, middleware and the database
//! connection used by the conversation store.

pub mod cancel;
pub mod config;
pub mod database;
pub mod error;
pub mod error_types;
pub mod logging;
pub mod metrics;
pub mod middleware;

// Re-export commonly used types
pub use cancel::StreamCancelHandle;
pub use config::{AppConfig, ModelConfig, ProviderConfig, ServerConfig};
pub use database::{Database, DatabaseConfig};
pub use error::{AppError, Result};
pub use logging::{get_provider_context, get_request_id, PROVIDER_CONTEXT, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::{request_id_middleware, MetricsMiddleware, ModelName, ProviderName};
