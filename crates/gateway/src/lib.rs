//! HTTP gateway for Pursuit.
//!
//! Exposes the chat submit/poll/stream boundary, feedback, thread reads
//! and a health check. Built on Axum.

pub mod chat;

#[cfg(test)]
mod test_support;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use pursuit_agent::ChatService;
use pursuit_config::AppConfig;

/// Request body cap; messages themselves are capped lower by the service.
const BODY_LIMIT: usize = 64 * 1024;

/// Build the router with every route and the shared layers.
pub fn build_router(service: ChatService) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("last-event-id"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .merge(chat::chat_router(service))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the service from `config` and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let service = pursuit_agent::bootstrap::build(&config).await?;
    let app = build_router(service);

    info!(addr = %addr, workers = config.service.workers, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
