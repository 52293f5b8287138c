//! API request and response models.
//!
//! Chat turn DTOs, model catalogue listings, conversation resources and
//! the shared [`Usage`] type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_MAX_TOKENS: u32 = 8000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"role": "user", "content": "Hello!"}))]
pub struct Message {
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One chat turn as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "messages": [{"role": "user", "content": "Hi"}],
    "model": "gpt-3.5-turbo",
    "provider": "openai",
    "max_tokens": 256,
    "temperature": 0.7,
    "stream": false
}))]
pub struct ChatRequest {
    /// Ordered conversation context; must not be empty
    pub messages: Vec<Message>,

    /// Model identifier; the configured default when absent
    #[serde(default)]
    pub model: Option<String>,

    /// Provider identifier; the configured default when absent
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 to 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub stream: bool,

    /// Append the completed turn to this conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

fn default_max_tokens() -> Option<u32> {
    Some(DEFAULT_MAX_TOKENS)
}

fn default_temperature() -> Option<f32> {
    Some(DEFAULT_TEMPERATURE)
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            provider: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: false,
            conversation_id: None,
        }
    }

    /// Boundary validation; nothing that fails here reaches a provider.
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must contain at least one message".to_string());
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(format!(
                    "temperature must be between 0 and {}",
                    MAX_TEMPERATURE
                ));
            }
        }
        if matches!(&self.provider, Some(p) if p.trim().is_empty()) {
            return Err("provider must not be blank".to_string());
        }
        if matches!(&self.model, Some(m) if m.trim().is_empty()) {
            return Err("model must not be blank".to_string());
        }
        Ok(())
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Token accounting for one turn.
///
/// `total_tokens` is always `prompt_tokens + completion_tokens`;
/// [`Usage::new`] is the only way to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(from = "UsageWire")]
#[schema(example = json!({"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}))]
pub struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
    /// Present and true when counts are a chars/4 approximation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    estimated: bool,
}

#[derive(Deserialize)]
struct UsageWire {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    estimated: bool,
}

impl From<UsageWire> for Usage {
    fn from(wire: UsageWire) -> Self {
        let usage = Usage::new(wire.prompt_tokens, wire.completion_tokens);
        if wire.estimated {
            usage.into_estimated()
        } else {
            usage
        }
    }
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            estimated: false,
        }
    }

    /// Approximate usage for providers that report none.
    ///
    /// Counts are `chars / 4` (floored) over the prompt contents joined
    /// without separators, and over the reply.
    pub fn estimate(prompt: &[Message], reply: &str) -> Self {
        let prompt_chars: usize = prompt.iter().map(|m| m.content.chars().count()).sum();
        Self::new(
            chars_to_tokens(prompt_chars),
            chars_to_tokens(reply.chars().count()),
        )
        .into_estimated()
    }

    fn into_estimated(mut self) -> Self {
        self.estimated = true;
        self
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    pub fn is_estimated(&self) -> bool {
        self.estimated
    }
}

fn chars_to_tokens(chars: usize) -> u32 {
    u32::try_from(chars / 4).unwrap_or(u32::MAX)
}

/// Complete reply for a non-streaming turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelListResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DefaultConfigResponse {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"status": "healthy"}))]
pub struct HealthResponse {
    pub status: String,
}

/// Error envelope returned by every failing JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub model: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationCreate {
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConversationUpdate {
    #[serde(default)]
    pub title: Option<String>,
    /// Replaces the whole message list
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Body of `POST /conversations/{id}/messages`: one message or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum NewMessages {
    One(Message),
    Many(Vec<Message>),
}

impl NewMessages {
    pub fn into_vec(self) -> Vec<Message> {
        match self {
            NewMessages::One(message) => vec![message],
            NewMessages::Many(messages) => messages,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Pagination for `GET /conversations`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Number of conversations to skip (>= 0)
    pub skip: Option<i64>,
    /// Page size (1..=100, default 10)
    pub limit: Option<i64>,
}

impl ListQuery {
    /// Resolve to `(skip, limit)` or a validation message.
    pub fn resolve(&self) -> Result<(usize, usize), String> {
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if skip < 0 {
            return Err("skip must be greater than or equal to 0".to_string());
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(format!("limit must be between 1 and {}", MAX_PAGE_LIMIT));
        }
        Ok((skip as usize, limit as usize))
    }
}
