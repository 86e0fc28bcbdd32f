pub mod api;

use crate::error::Result;
use crate::realtime::RealtimeService;
use crate::services::SharedMarketStore;
use crate::worker::SyncScheduler;
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: SharedMarketStore,
    pub scheduler: Arc<SyncScheduler>,
    pub realtime: Arc<RealtimeService>,
    pub started_at: Instant,
}

impl FromRef<AppState> for SharedMarketStore {
    fn from_ref(app_state: &AppState) -> SharedMarketStore {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Arc<SyncScheduler> {
    fn from_ref(app_state: &AppState) -> Arc<SyncScheduler> {
        app_state.scheduler.clone()
    }
}

impl FromRef<AppState> for Arc<RealtimeService> {
    fn from_ref(app_state: &AppState) -> Arc<RealtimeService> {
        app_state.realtime.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/stocks", get(api::list_stocks_handler))
        .route("/api/stocks/{ticker}", get(api::get_stock_handler))
        .route("/api/funds", get(api::list_funds_handler))
        .route("/api/funds/{code}", get(api::get_fund_handler))
        .route("/api/sync/status", get(api::sync_status_handler))
        .route("/api/sync/stocks", post(api::force_sync_stocks_handler))
        .route("/api/sync/funds", post(api::force_sync_funds_handler))
        .route("/api/realtime/stats", get(api::realtime_stats_handler))
        .route("/ws", get(api::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the axum server; returns once a shutdown signal is received.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    tracing::info!("Registering routes:");
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /api/stocks, /api/stocks/{{ticker}}");
    tracing::info!("  GET  /api/funds, /api/funds/{{code}}");
    tracing::info!("  GET  /api/sync/status");
    tracing::info!("  POST /api/sync/stocks, /api/sync/funds");
    tracing::info!("  GET  /api/realtime/stats");
    tracing::info!("  GET  /ws (WebSocket upgrade)");

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "shutdown signal listener failed");
    }
    tracing::info!("shutdown signal received");
}
