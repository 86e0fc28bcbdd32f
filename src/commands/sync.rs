use crate::error::Result;
use crate::services::fund_source::FundSource;
use crate::services::stock_source::StockSource;
use crate::services::{MarketStore, NavClient, QuoteClient, SharedMarketStore};
use crate::utils::get_data_dir;
use crate::worker::{SyncOutcome, SyncScheduler};
use std::sync::Arc;
use tracing::warn;

/// One-off reconciliation against the upstream sources.
pub async fn run(stocks_only: bool, funds_only: bool) -> Result<()> {
    let store: SharedMarketStore = Arc::new(MarketStore::new(get_data_dir()));
    if let Err(e) = store.load_snapshots().await {
        warn!(error = %e, "snapshot load failed, starting with an empty store");
    }
    store.seed_defaults().await;

    let quote_client: Arc<dyn StockSource> = Arc::new(QuoteClient::new()?);
    let nav_client: Arc<dyn FundSource> = Arc::new(NavClient::new()?);
    let scheduler = SyncScheduler::new(quote_client, nav_client, store);

    if !funds_only {
        match scheduler.force_sync_stocks().await {
            SyncOutcome::Completed(report) => {
                println!(
                    "stocks: {} fetched, {} skipped, {} failed batches ({} keys in {} batches)",
                    report.fetched,
                    report.skipped,
                    report.failed_batches,
                    report.total_keys,
                    report.batches
                );
            }
            SyncOutcome::Skipped => println!("stocks: skipped, sync already in progress"),
        }
    }

    if !stocks_only {
        match scheduler.force_sync_mutual_funds().await {
            SyncOutcome::Completed(report) => {
                println!(
                    "funds:  {} fetched, {} skipped, {} failed batches ({} keys in {} batches)",
                    report.fetched,
                    report.skipped,
                    report.failed_batches,
                    report.total_keys,
                    report.batches
                );
            }
            SyncOutcome::Skipped => println!("funds: skipped, sync already in progress"),
        }
    }

    Ok(())
}
