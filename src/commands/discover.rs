use crate::error::Result;
use crate::services::fund_source::FundSource;
use crate::services::stock_source::StockSource;
use crate::services::{MarketStore, NavClient, QuoteClient, SharedMarketStore};
use crate::utils::get_data_dir;
use crate::worker::{DiscoveryOutcome, SyncScheduler};
use std::sync::Arc;
use tracing::warn;

/// One-off discovery probe over the candidate universe.
pub async fn run() -> Result<()> {
    let store: SharedMarketStore = Arc::new(MarketStore::new(get_data_dir()));
    if let Err(e) = store.load_snapshots().await {
        warn!(error = %e, "snapshot load failed, starting with an empty store");
    }

    let quote_client: Arc<dyn StockSource> = Arc::new(QuoteClient::new()?);
    let nav_client: Arc<dyn FundSource> = Arc::new(NavClient::new()?);
    let scheduler = SyncScheduler::new(quote_client, nav_client, store);

    match scheduler.run_discovery().await {
        DiscoveryOutcome::Completed(report) => {
            println!(
                "discovery: probed {} candidates, {} unreachable",
                report.probed, report.skipped
            );
            if report.added.is_empty() {
                println!("no new penny stocks found");
            } else {
                println!("added: {}", report.added.join(", "));
            }
        }
        DiscoveryOutcome::Skipped => println!("discovery skipped, sync already in progress"),
    }

    Ok(())
}
