//! CLI module for the faultstream server.
//!
//! This module provides the `faultstream serve` command implementation.

mod config;
mod handlers;
mod state;

pub use config::{AnswersConfig, ClientConfig, Config, ConfigError, DispatchConfig, ServerConfig};
pub use handlers::{ChatQuery, ErrorBody, SuggestionStreamRequest, DEFAULT_CHAT_MESSAGE};
pub use state::AppState;

use crate::stats::{new_shared_stats, SharedStats};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route(
            "/health",
            get(handlers::health).options(handlers::preflight),
        )
        .route(
            "/api/stats",
            get(handlers::get_stats).options(handlers::preflight),
        )
        .route(
            "/api/stream/chat",
            get(handlers::stream_chat).options(handlers::preflight),
        )
        .route(
            "/api/suggestions",
            get(handlers::list_suggestions)
                .post(handlers::create_suggestion_stream)
                .options(handlers::preflight),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the server with the given configuration
pub async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    run_server_with_stats(config, new_shared_stats()).await
}

/// Run the server with the given configuration and shared stats
pub async fn run_server_with_stats(
    config: Config,
    stats: SharedStats,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    tracing::info!("Starting faultstream server on {}", addr);
    tracing::info!(
        "Configuration: failure_rate={}, seed={:?}, chunk_size={}, write_interval_ms={}",
        config.dispatch.failure_rate,
        config.dispatch.seed,
        config.dispatch.chunk_size,
        config.dispatch.write_interval_ms
    );
    tracing::info!("Stream endpoints: /api/stream/chat, /api/suggestions");
    tracing::info!("Stats endpoint: /api/stats");

    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(AppState::new(config, stats));
    serve(listener, state).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Serve on an already-bound listener until a shutdown signal arrives
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FailureInjector;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState::new(Config::default(), new_shared_stats())
            .with_injector(FailureInjector::disabled());
        router(Arc::new(state))
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[tokio::test]
    async fn test_plain_options_on_every_route() {
        for path in ["/health", "/api/stats", "/api/stream/chat", "/api/suggestions"] {
            let response = app()
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(path)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let response = app()
            .oneshot(
                Request::get("/api/suggestions")
                    .header(header::ORIGIN, "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = app()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
