//! 主应用程序入口
//!
//! 加载配置、组装存储与聊天服务，启动 Axum Web API。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatService, ChatServiceDependencies, ConnectionRegistry, HistoryLimits, SystemClock};
use axum::http::HeaderValue;
use config::AppConfig;
use infrastructure::{ChatStorage, InfrastructureConfig};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let storage = if config.uses_in_memory_store() {
        tracing::warn!("database.url is empty, using in-memory chat store");
        ChatStorage::in_memory()
    } else {
        ChatStorage::connect(InfrastructureConfig {
            database_url: config.database.url.clone(),
            max_connections: config.database.max_connections,
        })
        .await
        .context("failed to initialise chat storage")?
    };

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        rooms: storage.rooms,
        membership: storage.membership,
        messages: storage.messages,
        receipts: storage.receipts,
        clock: Arc::new(SystemClock),
        limits: HistoryLimits {
            default_page_size: config.chat.default_page_size,
            max_page_size: config.chat.max_page_size,
        },
    }));

    let registry = Arc::new(ConnectionRegistry::new());
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(chat_service, registry, jwt_service);

    let app = router(state).layer(cors_layer(&config.server.cors_origins));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "chat server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// `*` 或空列表放行任意来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}
