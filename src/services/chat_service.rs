//! Chat router: orchestrates one chat turn.
//!
//! A turn moves through `RECEIVED -> PROVIDER_SELECTED -> DISPATCHED_SYNC |
//! DISPATCHED_STREAM -> COMPLETED | FAILED`. Streamed turns are committed
//! to the client before the provider is contacted; everything after that
//! point, including failing to open the provider stream, is reported
//! in-band by the relay.

use crate::api::models::{ChatRequest, ChatResponse, Message, Usage};
use crate::core::cancel::StreamCancelHandle;
use crate::core::error::{AppError, Result};
use crate::core::error_types::StreamOutcomeCode;
use crate::core::logging::{get_provider_context, get_request_id};
use crate::core::metrics::get_metrics;
use crate::provider::{Invocation, ProviderAdapter, ProviderError, ProviderRegistry, ProviderRequest};
use crate::services::aggregator::{failed_relay, relay, Frame, RelayContext, RelayResult};
use crate::services::conversation_store::ConversationStore;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    ProviderSelected,
    DispatchedSync,
    DispatchedStream,
    Completed,
    Failed,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::Received => "RECEIVED",
            TurnState::ProviderSelected => "PROVIDER_SELECTED",
            TurnState::DispatchedSync => "DISPATCHED_SYNC",
            TurnState::DispatchedStream => "DISPATCHED_STREAM",
            TurnState::Completed => "COMPLETED",
            TurnState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Failed)
    }

    fn can_advance_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Received, ProviderSelected)
                | (ProviderSelected, DispatchedSync)
                | (ProviderSelected, DispatchedStream)
                | (DispatchedSync, Completed)
                | (DispatchedStream, Completed)
        ) || (next == Failed && !self.is_terminal())
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one turn, logged on every transition.
#[derive(Debug, Clone)]
pub struct TurnTracker {
    request_id: String,
    state: TurnState,
}

impl TurnTracker {
    pub fn new(request_id: impl Into<String>) -> Self {
        let tracker = Self {
            request_id: request_id.into(),
            state: TurnState::Received,
        };
        tracing::debug!(request_id = %tracker.request_id, state = %tracker.state, "Chat turn state");
        tracker
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn advance(&mut self, next: TurnState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                request_id = %self.request_id,
                from = %self.state,
                to = %next,
                "Ignoring invalid chat turn transition"
            );
            return;
        }
        tracing::debug!(request_id = %self.request_id, from = %self.state, state = %next, "Chat turn state");
        self.state = next;
        if next.is_terminal() {
            get_metrics()
                .chat_turns
                .with_label_values(&[&next.as_str().to_ascii_lowercase()])
                .inc();
        }
    }
}

/// Whether a turn was written to its conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStatus {
    Ok,
    Failed,
}

impl PersistenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistenceStatus::Ok => "ok",
            PersistenceStatus::Failed => "failed",
        }
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

pub enum ChatReply {
    Complete {
        response: ChatResponse,
        /// `None` when the request named no conversation
        persistence: Option<PersistenceStatus>,
    },
    Stream {
        frames: FrameStream,
        /// Signalled by the transport when the client goes away
        cancel: StreamCancelHandle,
        provider: String,
        model: String,
    },
}

impl fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatReply::Complete {
                response,
                persistence,
            } => f
                .debug_struct("Complete")
                .field("response", response)
                .field("persistence", persistence)
                .finish(),
            ChatReply::Stream {
                provider, model, ..
            } => f
                .debug_struct("Stream")
                .field("provider", provider)
                .field("model", model)
                .finish_non_exhaustive(),
        }
    }
}

pub struct ChatService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ConversationStore>,
    default_provider: String,
    default_model: String,
    request_timeout: Duration,
}

impl ChatService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ConversationStore>,
        default_provider: impl Into<String>,
        default_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            default_provider: default_provider.into(),
            default_model: default_model.into(),
            request_timeout,
        }
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run one chat turn.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply> {
        let mut tracker = TurnTracker::new(get_request_id());

        if let Err(message) = request.validate() {
            tracker.advance(TurnState::Failed);
            return Err(AppError::Validation(message));
        }

        let provider_id = request
            .provider
            .clone()
            .unwrap_or_else(|| self.default_provider.clone());
        let adapter = match self.registry.get_or_error(&provider_id) {
            Ok(adapter) => Arc::clone(adapter),
            Err(e) => {
                tracker.advance(TurnState::Failed);
                return Err(e);
            }
        };
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        tracker.advance(TurnState::ProviderSelected);

        let provider_request = ProviderRequest {
            messages: request.messages.clone(),
            model: model.clone(),
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
            stream: request.stream,
        };

        if request.stream {
            tracker.advance(TurnState::DispatchedStream);
            Ok(self.dispatch_stream(tracker, adapter, provider_request, request.conversation_id))
        } else {
            tracker.advance(TurnState::DispatchedSync);
            self.dispatch_sync(tracker, adapter, provider_request, request.conversation_id)
                .await
        }
    }

    async fn dispatch_sync(
        &self,
        mut tracker: TurnTracker,
        adapter: Arc<dyn ProviderAdapter>,
        request: ProviderRequest,
        conversation_id: Option<String>,
    ) -> Result<ChatReply> {
        let provider = adapter.id().to_string();
        let started = Instant::now();

        let invocation = tokio::time::timeout(self.request_timeout, adapter.invoke(&request))
            .await
            .unwrap_or(Err(ProviderError::Timeout));

        get_metrics()
            .provider_latency
            .with_label_values(&[&provider, "sync"])
            .observe(started.elapsed().as_secs_f64());

        let completion = match invocation {
            Ok(Invocation::Complete(completion)) => completion,
            Ok(Invocation::Stream(_)) => {
                tracker.advance(TurnState::Failed);
                return Err(AppError::Internal(
                    "provider returned a stream for a non-streaming call".to_string(),
                ));
            }
            Err(e) => {
                tracker.advance(TurnState::Failed);
                tracing::warn!(
                    provider = %provider,
                    model = %request.model,
                    error_type = e.error_type(),
                    error = %e,
                    "Provider call failed"
                );
                return Err(e.into());
            }
        };

        record_usage(&request.model, &provider, &completion.usage);

        let persistence = match conversation_id {
            Some(id) => Some(
                persist_turn(
                    self.store.as_ref(),
                    &id,
                    &request.messages,
                    &completion.content,
                    &request.model,
                    &provider,
                    "sync",
                )
                .await,
            ),
            None => None,
        };

        tracker.advance(TurnState::Completed);
        Ok(ChatReply::Complete {
            response: ChatResponse {
                message: Message::assistant(completion.content),
                usage: Some(completion.usage),
                provider,
                model: request.model,
            },
            persistence,
        })
    }

    fn dispatch_stream(
        &self,
        tracker: TurnTracker,
        adapter: Arc<dyn ProviderAdapter>,
        request: ProviderRequest,
        conversation_id: Option<String>,
    ) -> ChatReply {
        let provider = adapter.id().to_string();
        let model = request.model.clone();
        let prompt = request.messages.clone();
        let ctx = RelayContext::new(&model, &provider, prompt.clone());
        let (result_tx, result_rx) = oneshot::channel::<RelayResult>();

        let frames = {
            let provider = provider.clone();
            async_stream::stream! {
                let mut result_tx = Some(result_tx);
                let started = Instant::now();
                let opened = adapter.invoke(&request).await;
                get_metrics()
                    .provider_latency
                    .with_label_values(&[&provider, "stream_open"])
                    .observe(started.elapsed().as_secs_f64());

                match opened {
                    Ok(Invocation::Stream(chunks)) => {
                        let (frames, mut rx) = relay(chunks, ctx);
                        futures::pin_mut!(frames);
                        while let Some(frame) = frames.next().await {
                            if frame.is_terminal() {
                                // The relay publishes its result before
                                // handing out the terminal frame.
                                if let (Ok(result), Some(tx)) = (rx.try_recv(), result_tx.take()) {
                                    let _ = tx.send(result);
                                }
                            }
                            yield frame;
                        }
                    }
                    Ok(Invocation::Complete(_)) => {
                        let (frames, result) = failed_relay(ProviderError::UnexpectedFailure(
                            "provider returned a completion for a streaming call".to_string(),
                        ));
                        if let Some(tx) = result_tx.take() {
                            let _ = tx.send(result);
                        }
                        for await frame in frames {
                            yield frame;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            provider = %provider,
                            error_type = error.error_type(),
                            error = %error,
                            "Failed to open provider stream"
                        );
                        let (frames, result) = failed_relay(error);
                        if let Some(tx) = result_tx.take() {
                            let _ = tx.send(result);
                        }
                        for await frame in frames {
                            yield frame;
                        }
                    }
                }
            }
        };

        let cancel = StreamCancelHandle::new();
        let request_id = tracker.request_id.clone();
        let follow_up = finish_stream_turn(
            tracker,
            result_rx,
            cancel.clone(),
            Arc::clone(&self.store),
            StreamTurn {
                conversation_id,
                prompt,
                model: model.clone(),
                provider: provider.clone(),
            },
        );
        let provider_context = provider.clone();
        tokio::spawn(async move {
            crate::with_request_context!(request_id, provider_context, follow_up)
        });

        ChatReply::Stream {
            frames: Box::pin(frames),
            cancel,
            provider,
            model,
        }
    }
}

/// What the follow-up task needs to close out a streamed turn.
struct StreamTurn {
    conversation_id: Option<String>,
    prompt: Vec<Message>,
    model: String,
    provider: String,
}

/// Wait for a streamed turn to end, then persist it and record metrics.
///
/// Runs detached from the response body.
async fn finish_stream_turn(
    mut tracker: TurnTracker,
    result: oneshot::Receiver<RelayResult>,
    cancel: StreamCancelHandle,
    store: Arc<dyn ConversationStore>,
    turn: StreamTurn,
) {
    let metrics = get_metrics();
    let outcome = match result.await {
        Ok(Ok(outcome)) => {
            record_usage(&turn.model, &turn.provider, &outcome.usage);
            if let Some(id) = &turn.conversation_id {
                persist_turn(
                    store.as_ref(),
                    id,
                    &turn.prompt,
                    &outcome.full_text,
                    &turn.model,
                    &turn.provider,
                    "stream",
                )
                .await;
            }
            tracing::info!(
                request_id = %tracker.request_id,
                provider = %turn.provider,
                model = %turn.model,
                chunks = outcome.chunk_count,
                finish_reason = outcome.finish_reason.as_str(),
                "Stream completed"
            );
            tracker.advance(TurnState::Completed);
            StreamOutcomeCode::Done
        }
        Ok(Err(failure)) => {
            tracing::warn!(
                request_id = %tracker.request_id,
                provider = %turn.provider,
                model = %turn.model,
                error_type = failure.error_type,
                chunks = failure.chunk_count,
                error = %failure.message,
                "Stream failed"
            );
            tracker.advance(TurnState::Failed);
            StreamOutcomeCode::Error
        }
        Err(_) => {
            if cancel.is_cancelled() {
                tracing::info!(
                    request_id = %tracker.request_id,
                    provider = %turn.provider,
                    "Client disconnected, provider stream dropped"
                );
            } else {
                tracing::debug!(
                    request_id = %tracker.request_id,
                    provider = %turn.provider,
                    "Stream dropped before completion"
                );
            }
            tracker.advance(TurnState::Failed);
            StreamOutcomeCode::Cancelled
        }
    };

    metrics
        .stream_outcomes
        .with_label_values(&[&turn.provider, outcome.as_str()])
        .inc();
}

fn record_usage(model: &str, provider: &str, usage: &Usage) {
    let estimated = if usage.is_estimated() { "true" } else { "false" };
    let counter = &get_metrics().token_usage;
    counter
        .with_label_values(&[model, provider, "prompt", estimated])
        .inc_by(u64::from(usage.prompt_tokens()));
    counter
        .with_label_values(&[model, provider, "completion", estimated])
        .inc_by(u64::from(usage.completion_tokens()));
}

/// Append a turn to its conversation. Failures are logged and counted,
/// never returned: the reply has already been produced.
async fn persist_turn(
    store: &dyn ConversationStore,
    conversation_id: &str,
    prompt: &[Message],
    reply: &str,
    model: &str,
    provider: &str,
    mode: &str,
) -> PersistenceStatus {
    let error = match store
        .append_turn(conversation_id, prompt, reply, model, provider)
        .await
    {
        Ok(Some(_)) => {
            tracing::debug!(conversation_id = %conversation_id, "Chat turn persisted");
            return PersistenceStatus::Ok;
        }
        Ok(None) => "conversation not found".to_string(),
        Err(e) => e.to_string(),
    };

    tracing::warn!(
        request_id = %get_request_id(),
        provider = %get_provider_context(),
        conversation_id = %conversation_id,
        mode = %mode,
        error = %error,
        "Failed to persist chat turn"
    );
    get_metrics()
        .persistence_failures
        .with_label_values(&[mode])
        .inc();
    PersistenceStatus::Failed
}
