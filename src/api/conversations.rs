//! Conversation CRUD endpoints.

use crate::api::handlers::{json_body, AppState};
use crate::api::models::{
    Conversation, ConversationCreate, ConversationUpdate, ErrorResponse, ListQuery, NewMessages,
};
use crate::core::{AppError, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("conversation '{}'", id))
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = ConversationCreate,
    responses(
        (status = 201, description = "Conversation created", body = Conversation),
        (status = 422, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ConversationCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<Conversation>)> {
    let create = json_body(payload)?;
    if create.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }

    let conversation = state
        .store
        .create(create.title, create.messages, create.model, create.provider)
        .await?;
    tracing::info!(conversation_id = %conversation.id, "Conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    params(ListQuery),
    responses(
        (status = 200, description = "Conversations, most recently updated first", body = Vec<Conversation>),
        (status = 422, description = "Invalid pagination", body = ErrorResponse)
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conversation>>> {
    let (skip, limit) = query.resolve().map_err(AppError::Validation)?;
    Ok(Json(state.store.list(skip, limit).await?))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation", body = Conversation),
        (status = 404, description = "No such conversation", body = ErrorResponse)
    )
)]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

#[utoipa::path(
    put,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = ConversationUpdate,
    responses(
        (status = 200, description = "Updated conversation", body = Conversation),
        (status = 404, description = "No such conversation", body = ErrorResponse),
        (status = 422, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<ConversationUpdate>, JsonRejection>,
) -> Result<Json<Conversation>> {
    let update = json_body(payload)?;
    if matches!(&update.title, Some(title) if title.trim().is_empty()) {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }

    state
        .store
        .update(&id, update)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

#[utoipa::path(
    delete,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    responses(
        (status = 204, description = "Conversation deleted"),
        (status = 404, description = "No such conversation", body = ErrorResponse)
    )
)]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.store.delete(&id).await? {
        tracing::info!(conversation_id = %id, "Conversation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "conversations",
    params(("id" = String, Path, description = "Conversation id")),
    request_body = NewMessages,
    responses(
        (status = 200, description = "Conversation with the messages appended", body = Conversation),
        (status = 404, description = "No such conversation", body = ErrorResponse),
        (status = 422, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn append_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<NewMessages>, JsonRejection>,
) -> Result<Json<Conversation>> {
    let messages = json_body(payload)?.into_vec();
    if messages.is_empty() {
        return Err(AppError::Validation(
            "at least one message is required".to_string(),
        ));
    }

    state
        .store
        .append_messages(&id, messages)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}
