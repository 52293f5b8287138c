//! OpenAI-compatible chat completions adapter.

use super::client::{build_http_client, SharedClient, DEFAULT_HTTP_CLIENT};
use super::error::truncate_message;
use super::sse::{SseEvent, SseParser};
use super::{
    CanonicalChunk, ChunkStream, Completion, FinishReason, ProviderAdapter, ProviderError,
    ProviderRequest,
};
use crate::api::models::{ModelInfo, Usage};
use crate::core::config::ProviderConfig;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub name: String,
    pub api_base: String,
    pub api_key: String,
    pub models: Vec<ModelInfo>,
    /// Bound on a non-streaming call, and on opening a stream
    pub request_timeout: Duration,
}

impl OpenAiSettings {
    pub fn from_config(provider: &ProviderConfig, request_timeout: Duration) -> Self {
        let models = provider
            .models
            .iter()
            .map(|m| ModelInfo {
                id: m.id.clone(),
                provider: provider.name.clone(),
                name: m.display_name().to_string(),
            })
            .collect();

        Self {
            name: provider.name.clone(),
            api_base: provider.api_base.clone(),
            api_key: provider.api_key.clone(),
            models,
            request_timeout,
        }
    }
}

pub struct OpenAiAdapter {
    settings: OpenAiSettings,
    verify_ssl: bool,
    client: Arc<SharedClient<reqwest::Client>>,
}

impl OpenAiAdapter {
    /// Adapter backed by the process-wide HTTP client.
    pub fn new(settings: OpenAiSettings, verify_ssl: bool) -> Self {
        Self::with_client(settings, verify_ssl, Arc::clone(&DEFAULT_HTTP_CLIENT))
    }

    /// Adapter backed by its own client slot.
    pub fn with_client(
        settings: OpenAiSettings,
        verify_ssl: bool,
        client: Arc<SharedClient<reqwest::Client>>,
    ) -> Self {
        Self {
            settings,
            verify_ssl,
            client,
        }
    }

    fn http_client(&self) -> Result<Arc<reqwest::Client>, ProviderError> {
        self.client.get_or_try_init(|| {
            build_http_client(self.verify_ssl).map_err(|e| {
                tracing::error!(error = %e, "Failed to build HTTP client");
                ProviderError::UnexpectedFailure("failed to initialize HTTP client".to_string())
            })
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }

    fn build_payload(&self, request: &ProviderRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        });
        if stream {
            payload["stream_options"] = json!({"include_usage": true});
        }
        payload
    }

    async fn send(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let client = self.http_client()?;
        let response = client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&self.build_payload(request, stream))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.settings.name, error = %e, "Upstream request failed");
                ProviderError::from_transport(&e)
            })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(&self.settings.name, response).await)
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.settings.name
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.settings.models.clone()
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        let started = Instant::now();
        let call = async {
            let response = self.send(request, false).await?;
            let body: CompletionBody = response.json().await.map_err(|e| {
                tracing::warn!(provider = %self.settings.name, error = %e, "Unreadable completion body");
                ProviderError::UnexpectedFailure("provider returned an unreadable response".to_string())
            })?;
            Ok::<_, ProviderError>(body)
        };

        let body = tokio::time::timeout(self.settings.request_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout)??;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            ProviderError::UnexpectedFailure("provider returned no choices".to_string())
        })?;

        tracing::debug!(
            provider = %self.settings.name,
            model = %request.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );

        Ok(Completion::new(
            choice.message.content.unwrap_or_default(),
            body.usage.map(UsageBody::into_usage),
            choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_provider)
                .unwrap_or(FinishReason::Stop),
            &request.messages,
        ))
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let response = tokio::time::timeout(self.settings.request_timeout, self.send(request, true))
            .await
            .map_err(|_| ProviderError::Timeout)??;

        let provider = self.settings.name.clone();
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            // The finish chunk is held back so a trailing usage-only chunk
            // can be folded into it before it is released.
            let mut terminal: Option<CanonicalChunk> = None;
            let mut done = false;
            let mut closed = false;

            while !done && !closed {
                let events = match bytes.next().await {
                    Some(Ok(data)) => match parser.feed(&data) {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(provider = %provider, error = %e, "Upstream stream event too large");
                            yield Err(e);
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(provider = %provider, error = %e, "Upstream stream interrupted");
                        yield Err(ProviderError::from_transport(&e));
                        return;
                    }
                    None => {
                        closed = true;
                        parser.finish().into_iter().collect()
                    }
                };

                for event in events {
                    if event.is_done() {
                        done = true;
                        break;
                    }
                    match parse_stream_event(&event) {
                        Ok(None) => {}
                        Ok(Some(chunk)) => {
                            if let Some(held) = terminal.as_mut() {
                                if chunk.usage.is_some() {
                                    held.usage = chunk.usage;
                                }
                                if let Some(late) = chunk.delta_content.filter(|c| !c.is_empty()) {
                                    tracing::warn!(
                                        provider = %provider,
                                        bytes = late.len(),
                                        "Content received after finish reason; appending to final chunk"
                                    );
                                    held.delta_content
                                        .get_or_insert_with(String::new)
                                        .push_str(&late);
                                }
                            } else if chunk.is_terminal() {
                                terminal = Some(chunk);
                            } else {
                                yield Ok(chunk);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            match terminal {
                Some(chunk) => yield Ok(chunk),
                None if done => yield Ok(CanonicalChunk::finished(FinishReason::Stop)),
                None => {
                    tracing::warn!(provider = %provider, "Upstream closed the stream before completion");
                    yield Err(ProviderError::ConnectionFailure(
                        "provider closed the stream before completion".to_string(),
                    ));
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl UsageBody {
    fn into_usage(self) -> Usage {
        Usage::new(self.prompt_tokens, self.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct StreamBody {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<UsageBody>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Decode one upstream SSE event into a canonical chunk.
///
/// Returns `Ok(None)` for events that carry nothing (role-only deltas,
/// keep-alives).
fn parse_stream_event(event: &SseEvent) -> Result<Option<CanonicalChunk>, ProviderError> {
    let Some(data) = event.data.as_deref() else {
        return Ok(None);
    };
    if data.trim().is_empty() {
        return Ok(None);
    }

    let raw: Value = serde_json::from_str(data).map_err(|e| {
        tracing::warn!(error = %e, "Malformed upstream stream event");
        ProviderError::UnexpectedFailure("provider sent a malformed stream event".to_string())
    })?;
    let body: StreamBody = serde_json::from_value(raw.clone()).map_err(|e| {
        tracing::warn!(error = %e, "Unexpected upstream stream event shape");
        ProviderError::UnexpectedFailure("provider sent a malformed stream event".to_string())
    })?;

    if let Some(error) = body.error {
        let message = extract_error_message(&json!({ "error": error }))
            .unwrap_or_else(|| "provider reported an error mid-stream".to_string());
        return Err(ProviderError::UnexpectedFailure(truncate_message(&message)));
    }

    let choice = body.choices.into_iter().next();
    let delta_content = choice
        .as_ref()
        .and_then(|c| c.delta.content.clone())
        .filter(|c| !c.is_empty());
    let finish_reason = choice
        .as_ref()
        .and_then(|c| c.finish_reason.as_deref())
        .map(FinishReason::from_provider);
    let usage = body.usage.map(UsageBody::into_usage);

    if delta_content.is_none() && finish_reason.is_none() && usage.is_none() {
        return Ok(None);
    }

    Ok(Some(CanonicalChunk {
        delta_content,
        finish_reason,
        usage,
        raw_provider_payload: raw,
    }))
}

/// Pull a human-readable message out of an OpenAI-style error body.
fn extract_error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.as_str())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            body.get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
}

fn extract_error_code(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    match error.get("code").or_else(|| error.get("type"))? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
}

async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    tracing::warn!(
        provider = %provider,
        status = status,
        body = %truncate_message(&text),
        "Provider returned an error status"
    );

    ProviderError::from_status(
        status,
        extract_error_code(&body),
        extract_error_message(&body),
        retry_after,
    )
}
