use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chat_gateway::core::AppConfig;
use chat_gateway::provider::ProviderRegistry;
use chat_gateway::services::{ChatService, InMemoryConversationStore};
use chat_gateway::{build_router, AppState};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app() -> Router {
    let store = Arc::new(InMemoryConversationStore::new());
    let chat = Arc::new(ChatService::new(
        Arc::new(ProviderRegistry::new()),
        store.clone(),
        "openai",
        "gpt-3.5-turbo",
        Duration::from_secs(5),
    ));
    build_router(Arc::new(AppState::new(AppConfig::default(), chat, store)))
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, title: &str) -> String {
    let (status, body) = send(
        app,
        request("POST", "/api/conversations", Some(json!({"title": title}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_and_get() {
    let app = test_app();
    let (status, created) = send(
        &app,
        request(
            "POST",
            "/api/conversations",
            Some(json!({
                "title": "Trip planning",
                "messages": [{"role": "user", "content": "Where to?"}],
                "model": "gpt-4"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Trip planning");
    assert_eq!(created["model"], "gpt-4");
    assert_eq!(created["provider"], Value::Null);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&app, request("GET", &format!("/api/conversations/{}", id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_create_requires_title() {
    let app = test_app();
    let (status, body) = send(
        &app,
        request("POST", "/api/conversations", Some(json!({"title": "  "}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("title"));

    let (status, _) = send(
        &app,
        request("POST", "/api/conversations", Some(json!({"messages": []}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_is_most_recent_first_and_paginated() {
    let app = test_app();
    let first = create(&app, "first").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = create(&app, "second").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let third = create(&app, "third").await;

    let (status, all) = send(&app, request("GET", "/api/conversations", None)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

    let (_, page) = send(&app, request("GET", "/api/conversations?skip=1&limit=1", None)).await;
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["id"], second.as_str());
}

#[tokio::test]
async fn test_list_rejects_bad_pagination() {
    let app = test_app();
    for query in ["limit=0", "limit=101", "skip=-1"] {
        let (status, _) = send(
            &app,
            request("GET", &format!("/api/conversations?{}", query), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "query {}", query);
    }
}

#[tokio::test]
async fn test_update_is_partial() {
    let app = test_app();
    let id = create(&app, "draft").await;
    let uri = format!("/api/conversations/{}", id);

    let (status, updated) = send(
        &app,
        request("PUT", &uri, Some(json!({"provider": "openai"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "draft");
    assert_eq!(updated["provider"], "openai");

    let (status, _) = send(
        &app,
        request("PUT", "/api/conversations/missing", Some(json!({"title": "x"}))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_append_messages() {
    let app = test_app();
    let id = create(&app, "chat").await;
    let uri = format!("/api/conversations/{}/messages", id);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &uri,
            Some(json!([
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"}
            ])),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["messages"][1]["content"], "Hello!");

    let (status, _) = send(&app, request("POST", &uri, Some(json!([])))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_append_single_message_object() {
    let app = test_app();
    let id = create(&app, "chat").await;
    let uri = format!("/api/conversations/{}/messages", id);

    let (status, body) = send(
        &app,
        request("POST", &uri, Some(json!({"role": "user", "content": "Hi"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Hi");

    let (status, body) = send(
        &app,
        request(
            "POST",
            &uri,
            Some(json!({"role": "assistant", "content": "Hello!"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(body["messages"][1]["content"], "Hello!");

    let (status, _) = send(
        &app,
        request("POST", "/api/conversations/missing/messages", Some(json!({"content": "Hi"}))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete() {
    let app = test_app();
    let id = create(&app, "temporary").await;
    let uri = format!("/api/conversations/{}", id);

    let (status, body) = send(&app, request("DELETE", &uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send(&app, request("GET", &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, request("DELETE", &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
