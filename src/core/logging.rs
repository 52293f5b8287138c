//! Logging utilities with request and provider context.
//!
//! Request ids and provider names live in task-local storage so that logs
//! emitted deep inside an adapter can be correlated with the HTTP request
//! that caused them.

use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

tokio::task_local! {
    /// Task-local storage for the provider handling the current request.
    pub static PROVIDER_CONTEXT: String;
}

tokio::task_local! {
    /// Task-local storage for the current request ID.
    ///
    /// Set by the request id middleware and propagated into spawned
    /// follow-up tasks explicitly.
    pub static REQUEST_ID: String;
}

/// Get the current provider name from context, if set.
///
/// Returns an empty string if no provider context is set.
pub fn get_provider_context() -> String {
    PROVIDER_CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execute an async block with request context (request_id, provider).
///
/// ```ignore
/// with_request_context!(request_id, provider_name, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $provider_name:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope(
                $request_id,
                $crate::core::logging::PROVIDER_CONTEXT.scope($provider_name, $body),
            )
            .await
    };
}

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Build the filter from `RUST_LOG`, always muting noisy HTTP internals.
fn build_filter() -> EnvFilter {
    let base_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chat_gateway=debug".to_string());
    EnvFilter::new(format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn,sqlx=warn",
        base_filter
    ))
}

/// Install the global tracing subscriber.
///
/// `LOG_FORMAT=json` switches to structured JSON lines; `NO_COLOR` disables
/// ANSI colors for the human-readable format.
pub fn init_tracing() {
    let filter = build_filter();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_timer(LocalTime),
            )
            .init();
    } else {
        let no_color = std::env::var("NO_COLOR").is_ok();
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .init();
    }
}
