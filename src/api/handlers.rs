//! HTTP request handlers for the chat gateway.
//!
//! Chat, catalogue, health and metrics endpoints. Conversation CRUD lives
//! in [`crate::api::conversations`].

use crate::api::models::*;
use crate::api::streaming::sse_response;
use crate::core::config::AppConfig;
use crate::core::logging::{get_request_id, PROVIDER_CONTEXT};
use crate::core::metrics::render_metrics;
use crate::core::middleware::{ModelName, ProviderName};
use crate::core::{AppError, Result};
use crate::services::chat_service::{ChatReply, ChatService};
use crate::services::conversation_store::ConversationStore;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

pub const PERSISTENCE_STATUS_HEADER: &str = "x-persistence-status";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub chat: Arc<ChatService>,
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    pub fn new(config: AppConfig, chat: Arc<ChatService>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            config,
            chat,
            store,
        }
    }
}

/// Turn a JSON extractor rejection into a validation error.
pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// Handle one chat turn.
///
/// Streaming turns always answer 200 with `text/event-stream`; failures
/// after that point arrive as an in-band error frame.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply, or an SSE stream when `stream` is true", body = ChatResponse),
        (status = 400, description = "Unsupported provider", body = ErrorResponse),
        (status = 422, description = "Invalid request", body = ErrorResponse),
        (status = 502, description = "Provider failure", body = ErrorResponse),
        (status = 503, description = "Provider rate limit", body = ErrorResponse),
        (status = 504, description = "Provider timeout", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response> {
    let request = json_body(payload)?;
    let provider = request
        .provider
        .clone()
        .unwrap_or_else(|| state.chat.default_provider().to_string());

    tracing::debug!(
        request_id = %get_request_id(),
        provider = %provider,
        model = request.model.as_deref().unwrap_or(state.chat.default_model()),
        stream = request.stream,
        messages = request.messages.len(),
        "Processing chat request"
    );

    let reply = PROVIDER_CONTEXT
        .scope(provider, state.chat.handle(request))
        .await?;

    let response = match reply {
        ChatReply::Complete {
            response,
            persistence,
        } => {
            let labels = (
                ModelName(response.model.clone()),
                ProviderName(response.provider.clone()),
            );
            let mut http = Json(response).into_response();
            if let Some(status) = persistence {
                http.headers_mut().insert(
                    HeaderName::from_static(PERSISTENCE_STATUS_HEADER),
                    HeaderValue::from_static(status.as_str()),
                );
            }
            http.extensions_mut().insert(labels.0);
            http.extensions_mut().insert(labels.1);
            http
        }
        ChatReply::Stream {
            frames,
            cancel,
            provider,
            model,
        } => {
            let mut http = sse_response(frames, cancel);
            http.extensions_mut().insert(ModelName(model));
            http.extensions_mut().insert(ProviderName(provider));
            http
        }
    };

    Ok(response)
}

/// List every model advertised by the registered providers.
#[utoipa::path(
    get,
    path = "/api/models",
    tag = "catalogue",
    responses((status = 200, description = "Model catalogue", body = ModelListResponse))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        models: state.chat.registry().models(),
    })
}

#[utoipa::path(
    get,
    path = "/api/providers",
    tag = "catalogue",
    responses((status = 200, description = "Registered provider ids", body = ProvidersResponse))
)]
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.chat.registry().ids(),
    })
}

#[utoipa::path(
    get,
    path = "/api/default-config",
    tag = "catalogue",
    responses((status = 200, description = "Provider and model used when a request names none", body = DefaultConfigResponse))
)]
pub async fn default_config(State(state): State<Arc<AppState>>) -> Json<DefaultConfigResponse> {
    Json(DefaultConfigResponse {
        provider: state.chat.default_provider().to_string(),
        model: state.chat.default_model().to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let body = render_metrics().map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    )
        .into_response())
}
