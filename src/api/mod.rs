//! API layer for the chat gateway.
//!
//! HTTP handlers, request/response models, SSE transport and the router
//! that ties them together.

pub mod conversations;
pub mod disconnect;
pub mod handlers;
pub mod models;
pub mod streaming;

pub use handlers::AppState;

use crate::core::middleware::{request_id_middleware, MetricsMiddleware};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation for the gateway (default `/api` prefix).
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::chat,
        handlers::list_models,
        handlers::list_providers,
        handlers::default_config,
        handlers::health,
        conversations::create_conversation,
        conversations::list_conversations,
        conversations::get_conversation,
        conversations::update_conversation,
        conversations::delete_conversation,
        conversations::append_messages,
    ),
    components(
        schemas(
            models::Role,
            models::Message,
            models::ChatRequest,
            models::ChatResponse,
            models::Usage,
            models::ModelInfo,
            models::ModelListResponse,
            models::ProvidersResponse,
            models::DefaultConfigResponse,
            models::HealthResponse,
            models::ErrorResponse,
            models::Conversation,
            models::ConversationCreate,
            models::ConversationUpdate,
            models::NewMessages,
        )
    ),
    tags(
        (name = "chat", description = "Chat turns, plain or streamed over SSE"),
        (name = "catalogue", description = "Providers and models"),
        (name = "conversations", description = "Conversation storage"),
        (name = "health", description = "Liveness")
    ),
    info(
        title = "Chat Gateway API",
        version = "0.1.0",
        description = "Routes chat turns to LLM providers and relays streamed replies."
    )
)]
pub struct ApiDoc;

/// Routes served under the API prefix.
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/models", get(handlers::list_models))
        .route("/providers", get(handlers::list_providers))
        .route("/default-config", get(handlers::default_config))
        .route(
            "/conversations",
            post(conversations::create_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/:id",
            get(conversations::get_conversation)
                .put(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/:id/messages",
            post(conversations::append_messages),
        )
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.api_prefix();
    let api = if prefix.is_empty() {
        api_routes()
    } else {
        Router::new().nest(&prefix, api_routes())
    };

    Router::new()
        .merge(api)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
