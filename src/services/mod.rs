//! Business logic services for the chat gateway.
//!
//! The chat router drives each turn, the aggregator relays streamed
//! replies, and the conversation store persists completed turns.

pub mod aggregator;
pub mod chat_service;
pub mod conversation_store;

pub use chat_service::{ChatReply, ChatService, PersistenceStatus};
pub use conversation_store::{ConversationStore, InMemoryConversationStore, PgConversationStore};
