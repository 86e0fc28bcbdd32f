use crate::error::Result;
use crate::realtime::RealtimeService;
use crate::server::{self, AppState};
use crate::services::fund_source::FundSource;
use crate::services::stock_source::StockSource;
use crate::services::{MarketStore, NavClient, QuoteClient, SharedMarketStore};
use crate::utils::get_data_dir;
use crate::worker::SyncScheduler;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub async fn run(port: u16) -> Result<()> {
    let data_dir = get_data_dir();
    info!(data_dir = %data_dir.display(), port, "starting pennypulse server");

    let store: SharedMarketStore = Arc::new(MarketStore::new(data_dir));
    if let Err(e) = store.load_snapshots().await {
        warn!(error = %e, "snapshot load failed, starting with an empty store");
    }
    store.seed_defaults().await;

    let quote_client: Arc<dyn StockSource> = Arc::new(QuoteClient::new()?);
    let nav_client: Arc<dyn FundSource> = Arc::new(NavClient::new()?);

    let scheduler = SyncScheduler::new(quote_client.clone(), nav_client, store.clone());
    scheduler.init_cron_jobs();

    let realtime = RealtimeService::new(quote_client, store.clone());

    let state = AppState {
        store: store.clone(),
        scheduler: scheduler.clone(),
        realtime: realtime.clone(),
        started_at: Instant::now(),
    };

    let result = server::serve(state, port).await;

    info!("shutting down");
    scheduler.stop_cron_jobs();
    realtime.stop_real_time_updates();
    if let Err(e) = store.save_snapshots().await {
        warn!(error = %e, "final snapshot save failed");
    }

    result
}
