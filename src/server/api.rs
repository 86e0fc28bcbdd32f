use crate::models::{FundRecord, HistoryPoint, StockRecord};
use crate::realtime::{self, ConnectionStats, RealtimeService};
use crate::server::AppState;
use crate::services::market_hours;
use crate::services::SharedMarketStore;
use crate::worker::{SyncOutcome, SyncScheduler, SyncStatus};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Service health and data overview
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub market_open: bool,
    pub stocks: usize,
    pub funds: usize,
    pub sync: SyncStatus,
    pub realtime_clients: usize,
    pub realtime_running: bool,
}

/// Stock listing row; history is only returned by the single-record endpoint
#[derive(Debug, Serialize)]
pub struct StockSummary {
    pub ticker: String,
    pub name: String,
    pub exchange: String,
    pub current_price: f64,
    pub previous_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub last_updated: DateTime<Utc>,
    pub history_points: usize,
}

impl From<&StockRecord> for StockSummary {
    fn from(record: &StockRecord) -> Self {
        Self {
            ticker: record.ticker.clone(),
            name: record.name.clone(),
            exchange: record.exchange.clone(),
            current_price: record.current_price,
            previous_price: record.previous_price,
            change: record.change,
            change_percent: record.change_percent,
            volume: record.volume,
            last_updated: record.last_updated,
            history_points: record.price_history.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FundSummary {
    pub scheme_code: String,
    pub scheme_name: String,
    pub fund_house: String,
    pub current_nav: f64,
    pub previous_nav: f64,
    pub change: f64,
    pub change_percent: f64,
    pub last_updated: DateTime<Utc>,
    pub history_points: usize,
}

impl From<&FundRecord> for FundSummary {
    fn from(record: &FundRecord) -> Self {
        Self {
            scheme_code: record.scheme_code.clone(),
            scheme_name: record.scheme_name.clone(),
            fund_house: record.fund_house.clone(),
            current_nav: record.current_nav,
            previous_nav: record.previous_nav,
            change: record.change,
            change_percent: record.change_percent,
            last_updated: record.last_updated,
            history_points: record.nav_history.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StockDetail {
    #[serde(flatten)]
    pub summary: StockSummary,
    pub price_history: Vec<HistoryPoint>,
}

#[derive(Debug, Serialize)]
pub struct FundDetail {
    #[serde(flatten)]
    pub summary: FundSummary,
    pub nav_history: Vec<HistoryPoint>,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (stocks, funds) = state.store.record_counts().await;
    let sync = state.scheduler.get_sync_status().await;
    let realtime_stats = state.realtime.get_connection_stats().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        market_open: market_hours::is_market_open(),
        stocks,
        funds,
        sync,
        realtime_clients: realtime_stats.total_clients,
        realtime_running: realtime_stats.is_running,
    })
}

/// GET /api/stocks
pub async fn list_stocks_handler(State(store): State<SharedMarketStore>) -> Json<Vec<StockSummary>> {
    let records = store.list_stocks().await;
    Json(records.iter().map(StockSummary::from).collect())
}

/// GET /api/stocks/{ticker}
pub async fn get_stock_handler(
    State(store): State<SharedMarketStore>,
    Path(ticker): Path<String>,
) -> Response {
    match store.get_stock(&ticker).await {
        Some(record) => Json(StockDetail {
            summary: StockSummary::from(&record),
            price_history: record.price_history.clone(),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("stock {} not found", ticker.to_uppercase()) })),
        )
            .into_response(),
    }
}

/// GET /api/funds
pub async fn list_funds_handler(State(store): State<SharedMarketStore>) -> Json<Vec<FundSummary>> {
    let records = store.list_funds().await;
    Json(records.iter().map(FundSummary::from).collect())
}

/// GET /api/funds/{code}
pub async fn get_fund_handler(
    State(store): State<SharedMarketStore>,
    Path(code): Path<String>,
) -> Response {
    match store.get_fund(&code).await {
        Some(record) => Json(FundDetail {
            summary: FundSummary::from(&record),
            nav_history: record.nav_history.clone(),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("fund {} not found", code) })),
        )
            .into_response(),
    }
}

/// GET /api/sync/status
pub async fn sync_status_handler(State(scheduler): State<Arc<SyncScheduler>>) -> Json<SyncStatus> {
    Json(scheduler.get_sync_status().await)
}

/// POST /api/sync/stocks
pub async fn force_sync_stocks_handler(State(scheduler): State<Arc<SyncScheduler>>) -> Response {
    match scheduler.force_sync_stocks().await {
        SyncOutcome::Completed(report) => Json(json!({
            "status": "completed",
            "total_keys": report.total_keys,
            "batches": report.batches,
            "failed_batches": report.failed_batches,
            "fetched": report.fetched,
            "skipped": report.skipped,
        }))
        .into_response(),
        SyncOutcome::Skipped => sync_in_progress_response(),
    }
}

/// POST /api/sync/funds
pub async fn force_sync_funds_handler(State(scheduler): State<Arc<SyncScheduler>>) -> Response {
    match scheduler.force_sync_mutual_funds().await {
        SyncOutcome::Completed(report) => Json(json!({
            "status": "completed",
            "total_keys": report.total_keys,
            "batches": report.batches,
            "failed_batches": report.failed_batches,
            "fetched": report.fetched,
            "skipped": report.skipped,
        }))
        .into_response(),
        SyncOutcome::Skipped => sync_in_progress_response(),
    }
}

fn sync_in_progress_response() -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "status": "skipped", "message": "a sync is already in progress" })),
    )
        .into_response()
}

/// GET /api/realtime/stats
pub async fn realtime_stats_handler(
    State(service): State<Arc<RealtimeService>>,
) -> Json<ConnectionStats> {
    Json(service.get_connection_stats().await)
}

/// GET /ws - upgrade to the realtime update channel
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<RealtimeService>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| realtime::handle_socket(service, socket))
}
