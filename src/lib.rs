//! Chat Gateway - routes chat turns to LLM providers
//!
//! The gateway accepts chat requests over HTTP, forwards them to a
//! configured provider through a uniform adapter interface, and either
//! returns the full reply or relays the provider's stream to the client as
//! Server-Sent Events. Completed turns can be appended to a stored
//! conversation.
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging, metrics, middleware, database
//! - [`provider`]: the [`provider::ProviderAdapter`] trait, registry and
//!   the OpenAI-compatible adapter
//! - [`services`]: chat router, stream aggregator, conversation store
//! - [`api`]: HTTP handlers, SSE transport and the router
//!
//! # Configuration
//!
//! Optional environment variables:
//! - `CONFIG_PATH`: YAML configuration file
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8000)
//! - `API_PREFIX`: Prefix for the API routes (default: /api)
//! - `OPENAI_API_KEY` / `OPENAI_API_BASE`: credentials for the `openai` provider
//! - `DEFAULT_PROVIDER` / `DEFAULT_MODEL`: used when a request names none
//! - `REQUEST_TIMEOUT_SECS`: Provider call timeout in seconds (default: 30)
//! - `DB_URL`: PostgreSQL URL for conversations (in-memory when unset)

pub mod api;
pub mod core;
pub mod provider;
pub mod services;

pub use api::{build_router, ApiDoc, AppState};
pub use core::{AppConfig, AppError, Database, DatabaseConfig, Result};
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use services::{ChatService, ConversationStore, InMemoryConversationStore};
