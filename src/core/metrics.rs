//! Prometheus metrics for the chat gateway.
//!
//! A single registry-backed [`Metrics`] instance is created lazily and
//! shared process-wide.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint, model, provider, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Total token usage by model, provider, token type and whether it was estimated
    pub token_usage: IntCounterVec,

    /// Provider call latency (time to reply or time to open the stream)
    pub provider_latency: HistogramVec,

    /// Streamed turns by terminal outcome (done, error, cancelled)
    pub stream_outcomes: IntCounterVec,

    /// Conversation store writes that failed after a successful reply
    pub persistence_failures: IntCounterVec,

    /// Chat turns that reached a terminal state (completed or failed)
    pub chat_turns: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call more than once; later calls return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "chat_gateway_requests_total",
            "Total number of requests",
            &["method", "endpoint", "model", "provider", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "chat_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint", "model", "provider"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "chat_gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let token_usage = register_int_counter_vec!(
            "chat_gateway_tokens_total",
            "Total number of tokens used",
            &["model", "provider", "token_type", "estimated"]
        )
        .expect("Failed to register token_usage metric");

        let provider_latency = register_histogram_vec!(
            "chat_gateway_provider_latency_seconds",
            "Provider response latency in seconds",
            &["provider", "mode"],
            vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register provider_latency metric");

        let stream_outcomes = register_int_counter_vec!(
            "chat_gateway_stream_outcomes_total",
            "Streamed turns by terminal outcome",
            &["provider", "outcome"]
        )
        .expect("Failed to register stream_outcomes metric");

        let persistence_failures = register_int_counter_vec!(
            "chat_gateway_persistence_failures_total",
            "Conversation writes that failed after a reply was produced",
            &["mode"]
        )
        .expect("Failed to register persistence_failures metric");

        let chat_turns = register_int_counter_vec!(
            "chat_gateway_chat_turns_total",
            "Chat turns by terminal state",
            &["state"]
        )
        .expect("Failed to register chat_turns metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            token_usage,
            provider_latency,
            stream_outcomes,
            persistence_failures,
            chat_turns,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Render every registered metric in the Prometheus text format.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
