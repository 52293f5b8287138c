//! Stream aggregator: relays canonical chunks as SSE frames while
//! reconstructing the full reply.
//!
//! The relay is pull-driven. A provider chunk is read only when the
//! consumer polls for the next frame, so at most one chunk is in flight.
//! Every relay ends with exactly one terminal frame: the `[DONE]` sentinel
//! on success, or a single error frame.

use crate::api::models::{Message, Usage};
use crate::core::error::AppError;
use crate::provider::{CanonicalChunk, ChunkStream, FinishReason, ProviderError};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::oneshot;

pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Identity of the turn, stamped into every content frame.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub provider: String,
    /// Prompt used for usage estimation when the provider reports none
    pub prompt: Vec<Message>,
}

impl RelayContext {
    pub fn new(model: impl Into<String>, provider: impl Into<String>, prompt: Vec<Message>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            provider: provider.into(),
            prompt,
        }
    }
}

/// One SSE frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// OpenAI-chunk shaped payload carrying one delta
    Content(serde_json::Value),
    Done,
    Error(String),
}

impl Frame {
    fn content(ctx: &RelayContext, delta: &str) -> Self {
        Frame::Content(json!({
            "id": ctx.id,
            "object": "chat.completion.chunk",
            "created": ctx.created,
            "model": ctx.model,
            "provider": ctx.provider,
            "choices": [{
                "index": 0,
                "delta": {"content": delta},
                "finish_reason": null
            }]
        }))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Done | Frame::Error(_))
    }

    /// Delta text carried by a content frame.
    pub fn delta(&self) -> Option<&str> {
        match self {
            Frame::Content(value) => value["choices"][0]["delta"]["content"].as_str(),
            _ => None,
        }
    }

    /// Encode as `data: <payload>\n\n`.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Frame::Content(value) => Bytes::from(format!("data: {}\n\n", value)),
            Frame::Done => Bytes::from_static(SSE_DONE.as_bytes()),
            Frame::Error(message) => {
                Bytes::from(format!("data: {}\n\n", json!({ "error": message })))
            }
        }
    }
}

/// Published once the sentinel has been emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub full_text: String,
    pub chunk_count: usize,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// Published when the relay ended with an error frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFailure {
    pub message: String,
    pub error_type: &'static str,
    /// Text relayed before the failure
    pub partial_text: String,
    pub chunk_count: usize,
}

pub type RelayResult = Result<StreamOutcome, RelayFailure>;

struct RelayState {
    chunks: ChunkStream,
    ctx: RelayContext,
    text: String,
    chunk_count: usize,
    usage: Option<Usage>,
    /// Sentinel owed after a terminal chunk that also carried content
    pending_done: Option<FinishReason>,
    finished: bool,
    outcome_tx: Option<oneshot::Sender<RelayResult>>,
}

impl RelayState {
    fn done(&mut self, finish_reason: FinishReason) -> Frame {
        self.finished = true;
        let usage = self
            .usage
            .unwrap_or_else(|| Usage::estimate(&self.ctx.prompt, &self.text));
        let outcome = StreamOutcome {
            full_text: std::mem::take(&mut self.text),
            chunk_count: self.chunk_count,
            usage,
            finish_reason,
        };
        if let Some(tx) = self.outcome_tx.take() {
            let _ = tx.send(Ok(outcome));
        }
        Frame::Done
    }

    fn fail(&mut self, message: String, error_type: &'static str) -> Frame {
        self.finished = true;
        let failure = RelayFailure {
            message: message.clone(),
            error_type,
            partial_text: std::mem::take(&mut self.text),
            chunk_count: self.chunk_count,
        };
        if let Some(tx) = self.outcome_tx.take() {
            let _ = tx.send(Err(failure));
        }
        Frame::Error(message)
    }

    fn fail_provider(&mut self, error: ProviderError) -> Frame {
        let error_type = error.error_type();
        self.fail(error.to_string(), error_type)
    }

    fn fail_aggregation(&mut self) -> Frame {
        let error = AppError::Aggregation("provider reported an error finish reason".to_string());
        self.fail(error.client_message(), error.error_type())
    }

    /// Fold one chunk into the accumulator, returning the frame to emit.
    fn absorb(&mut self, chunk: CanonicalChunk) -> Option<Frame> {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if chunk.finish_reason == Some(FinishReason::Error) {
            return Some(self.fail_aggregation());
        }

        let content = chunk
            .delta_content
            .filter(|delta| !delta.is_empty())
            .map(|delta| {
                self.text.push_str(&delta);
                self.chunk_count += 1;
                Frame::content(&self.ctx, &delta)
            });

        match (chunk.finish_reason, content) {
            (Some(reason), Some(frame)) => {
                self.pending_done = Some(reason);
                Some(frame)
            }
            (Some(reason), None) => Some(self.done(reason)),
            (None, frame) => frame,
        }
    }
}

/// Relay `chunks` as frames.
///
/// Returns the frame stream and a receiver for the turn's result. If the
/// frame stream is dropped before its terminal frame, the receiver
/// resolves to `RecvError` (the turn was cancelled).
pub fn relay(
    chunks: ChunkStream,
    ctx: RelayContext,
) -> (
    impl Stream<Item = Frame> + Send + 'static,
    oneshot::Receiver<RelayResult>,
) {
    let (tx, rx) = oneshot::channel();
    let state = RelayState {
        chunks,
        ctx,
        text: String::new(),
        chunk_count: 0,
        usage: None,
        pending_done: None,
        finished: false,
        outcome_tx: Some(tx),
    };

    let frames = stream::unfold(state, |mut state| async move {
        if let Some(reason) = state.pending_done.take() {
            let frame = state.done(reason);
            return Some((frame, state));
        }
        if state.finished {
            return None;
        }

        loop {
            let frame = match state.chunks.next().await {
                None => Some(state.done(FinishReason::Stop)),
                Some(Err(error)) => Some(state.fail_provider(error)),
                Some(Ok(chunk)) => state.absorb(chunk),
            };
            if let Some(frame) = frame {
                return Some((frame, state));
            }
        }
    });

    (frames, rx)
}

/// A relay that fails before any chunk: used when the provider stream
/// could not be opened after the response was already committed.
pub fn failed_relay(error: ProviderError) -> (impl Stream<Item = Frame> + Send + 'static, RelayResult) {
    let failure = RelayFailure {
        message: error.to_string(),
        error_type: error.error_type(),
        partial_text: String::new(),
        chunk_count: 0,
    };
    let frame = Frame::Error(failure.message.clone());
    (stream::iter(std::iter::once(frame)), Err(failure))
}
