//! Provider adapters.
//!
//! An adapter turns a provider-agnostic [`ProviderRequest`] into one
//! provider's wire call and normalizes the reply into either a
//! [`Completion`] or a stream of [`CanonicalChunk`]s. Adapters are held in a
//! [`ProviderRegistry`] keyed by provider identifier.

pub mod client;
pub mod error;
pub mod openai;
pub mod sse;

pub use client::{SharedClient, DEFAULT_HTTP_CLIENT};
pub use error::ProviderError;

use crate::api::models::{Message, ModelInfo, Usage};
use crate::core::config::AppConfig;
use crate::core::error::{AppError, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Why a provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

impl FinishReason {
    /// Map a provider's finish reason; unknown non-null values count as a
    /// normal stop.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "length" => FinishReason::Length,
            "error" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

/// One normalized piece of a streamed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalChunk {
    pub delta_content: Option<String>,
    /// Non-null on the terminal chunk
    pub finish_reason: Option<FinishReason>,
    /// Provider-reported token counts, when included in the stream
    pub usage: Option<Usage>,
    pub raw_provider_payload: serde_json::Value,
}

impl CanonicalChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            delta_content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn finished(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<CanonicalChunk, ProviderError>> + Send>>;

/// A fully resolved call: provider and model already chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// Reply to a non-streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

impl Completion {
    /// Build a completion, estimating usage when the provider reported none.
    pub fn new(
        content: String,
        reported_usage: Option<Usage>,
        finish_reason: FinishReason,
        prompt: &[Message],
    ) -> Self {
        let usage = reported_usage.unwrap_or_else(|| Usage::estimate(prompt, &content));
        Self {
            content,
            usage,
            finish_reason,
        }
    }
}

/// What [`ProviderAdapter::invoke`] produced, selected by `request.stream`.
pub enum Invocation {
    Complete(Completion),
    Stream(ChunkStream),
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Complete(c) => f.debug_tuple("Complete").field(c).finish(),
            Invocation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Identifier clients use to select this provider.
    fn id(&self) -> &str;

    /// Models this provider advertises.
    fn models(&self) -> Vec<ModelInfo>;

    async fn complete(
        &self,
        request: &ProviderRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Open a streamed reply. Errors after the stream is open arrive as
    /// stream items; the stream ends after the terminal chunk or the first
    /// error.
    async fn stream(
        &self,
        request: &ProviderRequest,
    ) -> std::result::Result<ChunkStream, ProviderError>;

    async fn invoke(
        &self,
        request: &ProviderRequest,
    ) -> std::result::Result<Invocation, ProviderError> {
        if request.stream {
            self.stream(request).await.map(Invocation::Stream)
        } else {
            self.complete(request).await.map(Invocation::Complete)
        }
    }
}

/// Registry of provider adapters keyed by identifier.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        let request_timeout = Duration::from_secs(config.request_timeout_secs);

        for provider in &config.providers {
            match provider.provider_type.as_str() {
                "openai" => {
                    let adapter = openai::OpenAiAdapter::new(
                        openai::OpenAiSettings::from_config(provider, request_timeout),
                        config.verify_ssl,
                    );
                    registry.register(Arc::new(adapter));
                }
                other => anyhow::bail!(
                    "Provider '{}' has unsupported provider_type '{}'",
                    provider.name,
                    other
                ),
            }
        }
        Ok(registry)
    }

    /// Register an adapter, replacing any adapter with the same id.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(id)
    }

    pub fn get_or_error(&self, id: &str) -> Result<&Arc<dyn ProviderAdapter>> {
        self.get(id)
            .ok_or_else(|| AppError::UnsupportedProvider(id.to_string()))
    }

    /// Registered ids, sorted for stable output.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The combined catalogue of every registered provider.
    pub fn models(&self) -> Vec<ModelInfo> {
        self.ids()
            .iter()
            .filter_map(|id| self.adapters.get(id))
            .flat_map(|adapter| adapter.models())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
