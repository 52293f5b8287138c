//! Chat Gateway - Main entry point
//!
//! Loads configuration, picks a conversation store, and serves the HTTP
//! router.

use anyhow::Result;
use chat_gateway::{
    build_router,
    core::{init_metrics, logging::init_tracing, AppConfig, Database, DatabaseConfig},
    services::{ChatService, ConversationStore, InMemoryConversationStore, PgConversationStore},
    AppState, ProviderRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(|| detect_cpu_limit().unwrap_or(1));

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_tracing();
    init_metrics();

    let config = AppConfig::load_default()?;

    let registry = ProviderRegistry::from_config(&config)?;
    if registry.is_empty() {
        tracing::warn!("No providers configured; every chat request will be rejected");
    }
    for provider in registry.ids() {
        tracing::info!(provider = %provider, "Provider registered");
    }

    let store = open_store(&config).await?;

    let chat = Arc::new(ChatService::new(
        Arc::new(registry),
        Arc::clone(&store),
        config.default_provider.clone(),
        config.default_model.clone(),
        Duration::from_secs(config.request_timeout_secs),
    ));

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HOST '{}': {}", config.server.host, e))?;
    let addr = SocketAddr::new(host, config.server.port);
    let prefix = config.api_prefix();

    let app = build_router(Arc::new(AppState::new(config, chat, store)));

    tracing::info!("Starting Chat Gateway on {}", addr);
    tracing::info!("Chat API: {}/chat, {}/conversations", prefix, prefix);
    tracing::info!("Swagger UI: /swagger-ui");
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// PostgreSQL when `DB_URL` is configured, otherwise an in-memory store.
async fn open_store(config: &AppConfig) -> Result<Arc<dyn ConversationStore>> {
    match &config.database_url {
        Some(url) => {
            let db_config = DatabaseConfig::from_url(url);
            tracing::info!("Connecting to database...");
            let db = Database::connect(&db_config).await?;
            db.ensure_schema().await?;
            tracing::info!("Database connected successfully");
            Ok(Arc::new(PgConversationStore::new(db.pool().clone())))
        }
        None => {
            tracing::info!("DB_URL not set; conversations are kept in memory");
            Ok(Arc::new(InMemoryConversationStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Detect CPU limit from cgroup (for containerized environments)
fn detect_cpu_limit() -> Option<usize> {
    // cgroup v2
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let parts: Vec<&str> = max.split_whitespace().collect();
        if let [quota, period] = parts.as_slice() {
            if let (Ok(quota), Ok(period)) = (quota.parse::<i64>(), period.parse::<i64>()) {
                if quota > 0 && period > 0 {
                    return Some(((quota as f64 / period as f64).ceil() as usize).max(1));
                }
            }
        }
    }

    // cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    (quota > 0 && period > 0).then(|| ((quota as f64 / period as f64).ceil() as usize).max(1))
}
