use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chat_gateway::api::models::ModelInfo;
use chat_gateway::core::{get_metrics, AppConfig};
use chat_gateway::provider::{
    CanonicalChunk, ChunkStream, Completion, ProviderAdapter, ProviderError, ProviderRegistry,
    ProviderRequest,
};
use chat_gateway::services::{ChatService, InMemoryConversationStore};
use chat_gateway::{build_router, AppState};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Sends one chunk, then stalls until the stream is dropped.
struct StallingAdapter {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderAdapter for StallingAdapter {
    fn id(&self) -> &str {
        "stalling"
    }

    fn models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }

    async fn complete(&self, _request: &ProviderRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::UnexpectedFailure("stream only".to_string()))
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let guard = DropFlag(Arc::clone(&self.dropped));
        Ok(Box::pin(async_stream::stream! {
            let _guard = guard;
            yield Ok(CanonicalChunk::content("first"));
            futures::future::pending::<()>().await;
        }))
    }
}

fn cancelled_count() -> u64 {
    get_metrics()
        .stream_outcomes
        .with_label_values(&["stalling", "cancelled"])
        .get()
}

#[tokio::test]
async fn test_client_disconnect_drops_provider_stream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(StallingAdapter {
        dropped: Arc::clone(&dropped),
    }));
    let store = Arc::new(InMemoryConversationStore::new());
    let chat = Arc::new(ChatService::new(
        Arc::new(registry),
        store.clone(),
        "stalling",
        "m",
        Duration::from_secs(5),
    ));
    let app = build_router(Arc::new(AppState::new(AppConfig::default(), chat, store)));
    let before = cancelled_count();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"messages":[{"content":"Hi"}],"stream":true}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.starts_with("data: "));
    assert!(first.contains("\"first\""));

    // The next frame never comes; the client hangs up.
    let pending = tokio::time::timeout(Duration::from_millis(50), body.next()).await;
    assert!(pending.is_err());
    drop(body);

    assert!(dropped.load(Ordering::SeqCst));
    for _ in 0..100 {
        if cancelled_count() > before {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cancellation was not observed");
}
