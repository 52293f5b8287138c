//! HTTP middleware for request ids and metrics.

use crate::core::logging::{generate_request_id, REQUEST_ID};
use crate::core::metrics::get_metrics;
use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied request id we are willing to echo back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Extension type for storing model name in response
#[derive(Clone, Debug)]
pub struct ModelName(pub String);

/// Extension type for storing provider name in response
#[derive(Clone, Debug)]
pub struct ProviderName(pub String);

fn incoming_request_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map(|id| id.to_string())
}

/// Assign a request id (reusing a sane incoming `x-request-id`), run the
/// rest of the stack inside its task-local scope, and echo it back.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = incoming_request_id(&request).unwrap_or_else(generate_request_id);

    let mut response = REQUEST_ID.scope(request_id.clone(), next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Record request count, duration and in-flight gauge.
    ///
    /// Model and provider labels come from [`ModelName`] / [`ProviderName`]
    /// response extensions set by the chat handler. For streaming responses
    /// the recorded duration is time to first byte.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        // Route templates keep the label set bounded (`/api/conversations/:id`).
        let endpoint = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        let method = request.method().to_string();

        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        let model = response
            .extensions()
            .get::<ModelName>()
            .map(|m| m.0.as_str())
            .unwrap_or("unknown");
        let provider = response
            .extensions()
            .get::<ProviderName>()
            .map(|p| p.0.as_str())
            .unwrap_or("unknown");

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, model, provider, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint, model, provider])
            .observe(duration);

        let is_streaming = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if provider != "unknown" {
            tracing::info!(
                "{} {} - status={} model={} provider={} {}={:.3}s",
                method,
                endpoint,
                status_code,
                model,
                provider,
                if is_streaming { "ttfb" } else { "duration" },
                duration
            );
        } else {
            tracing::info!(
                "{} {} - status={} duration={:.3}s",
                method,
                endpoint,
                status_code,
                duration
            );
        }

        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .dec();

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logging::get_request_id;
    use crate::core::metrics::init_metrics;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let app = Router::new()
            .route("/test", get(|| async { get_request_id() }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(header.len(), 36);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, header.as_bytes());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "client-supplied-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "client-supplied-id"
        );
    }

    #[tokio::test]
    async fn test_oversized_request_id_is_replaced() {
        let app = Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "x".repeat(MAX_REQUEST_ID_LEN + 1))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap().len(),
            36
        );
    }

    #[tokio::test]
    async fn test_track_metrics_records_labels_from_extensions() {
        init_metrics();
        let metrics = get_metrics();
        let labels = ["GET", "/labelled", "m-test", "p-test", "200"];
        let initial = metrics.request_count.with_label_values(&labels).get();

        async fn handler() -> Response {
            let mut response = "ok".into_response();
            response
                .extensions_mut()
                .insert(ModelName("m-test".to_string()));
            response
                .extensions_mut()
                .insert(ProviderName("p-test".to_string()));
            response
        }

        let app = Router::new()
            .route("/labelled", get(handler))
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/labelled")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            metrics.request_count.with_label_values(&labels).get(),
            initial + 1
        );
    }

    #[tokio::test]
    async fn test_active_requests_returns_to_baseline() {
        init_metrics();
        let metrics = get_metrics();
        let endpoint = "/test-active-requests";
        let initial = metrics.active_requests.with_label_values(&[endpoint]).get();

        let app = Router::new()
            .route(endpoint, get(|| async { "ok" }))
            .layer(middleware::from_fn(MetricsMiddleware::track_metrics));

        app.oneshot(Request::builder().uri(endpoint).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(
            metrics.active_requests.with_label_values(&[endpoint]).get(),
            initial
        );
    }
}
