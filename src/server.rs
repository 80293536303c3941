use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::analytics::SessionAnalyticsService;
use crate::auth::DevAuthService;
use crate::cache::{CacheStore, MemoryCacheStore};
use crate::chat::InMemoryChatService;
use crate::config::Config;
use crate::gateway::{ChatGateway, RoomDeliveryHandler, RoomRegistry};
use crate::monitor::PerformanceMonitor;
use crate::queue::MessageQueueService;
use crate::session::SessionManager;
use crate::store::MemorySessionRepository;

// ============================================================================
// Runtime Services
// ============================================================================

/// Shared runtime services wired together at startup.
#[derive(Clone)]
pub struct RuntimeServices {
    pub cache: Arc<dyn CacheStore>,
    pub sessions: SessionManager,
    pub analytics: SessionAnalyticsService,
    pub monitor: PerformanceMonitor,
    pub queue: MessageQueueService,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub services: RuntimeServices,
    pub gateway: Arc<ChatGateway>,
}

/// Build the full service graph against the given cache and collaborators.
pub fn build_services(config: &Config) -> AppState {
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let repository = Arc::new(MemorySessionRepository::new());

    let analytics = SessionAnalyticsService::new(
        cache.clone(),
        config.analytics.ttl(),
        config.analytics.response_time_cap,
        config.analytics.aggregation_window(),
    );
    let sessions = SessionManager::new(
        cache.clone(),
        repository,
        analytics.clone(),
        config.session.ttl(),
    );
    let monitor = PerformanceMonitor::new(
        cache.clone(),
        config.monitor.settings(config.session.ttl()),
    );

    let rooms = Arc::new(RoomRegistry::new());
    let queue = MessageQueueService::new(
        cache.clone(),
        Arc::new(RoomDeliveryHandler::new(rooms.clone())),
        config.queue.settings(),
    );

    let gateway = Arc::new(ChatGateway::new(
        Arc::new(DevAuthService),
        Arc::new(InMemoryChatService::new()),
        sessions.clone(),
        monitor.clone(),
        queue.clone(),
        rooms,
    ));

    AppState {
        services: RuntimeServices {
            cache,
            sessions,
            analytics,
            monitor,
            queue,
        },
        gateway,
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    // Health routes get a request timeout; the WebSocket route must not.
    let health_routes = Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .merge(health_routes)
}

async fn livez() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.services.cache.get("readyz:probe").await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| gateway.handle_socket(socket, params.token))
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Start the server and run until interrupted.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = build_services(&config);
    let services = state.services.clone();

    services.queue.start().await;
    services.monitor.start().await;

    // Hourly analytics aggregation; the job itself no-ops on an empty window.
    let (aggregation_tx, aggregation_rx) = watch::channel(false);
    let aggregation = {
        let analytics = services.analytics.clone();
        let mut shutdown = aggregation_rx;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(report) = analytics.aggregate_session_data().await {
                            info!(sessions = report.sessions, "analytics aggregation complete");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let app = build_app(state, config.server.request_timeout_seconds);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down background services");
    if aggregation_tx.send(true).is_err() {
        warn!("aggregation loop already stopped");
    }
    if let Err(e) = aggregation.await {
        error!(error = ?e, "aggregation loop panicked");
    }
    services.queue.shutdown().await;
    services.monitor.shutdown().await;
    services.analytics.cleanup().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
