use crate::error::Result;
use crate::services::market_hours;
use crate::services::{MarketStore, SharedMarketStore};
use crate::utils::get_data_dir;
use std::sync::Arc;

/// Print a summary of the locally stored snapshots.
pub async fn run() -> Result<()> {
    let data_dir = get_data_dir();
    let store: SharedMarketStore = Arc::new(MarketStore::new(data_dir.clone()));
    store.load_snapshots().await?;

    let (stock_count, fund_count) = store.record_counts().await;
    println!("data dir:    {}", data_dir.display());
    println!("market open: {}", market_hours::is_market_open());
    println!("stocks:      {}", stock_count);
    println!("funds:       {}", fund_count);

    let stocks = store.list_stocks().await;
    if let Some(freshest) = stocks.iter().map(|r| r.last_updated).max() {
        println!("last update: {}", freshest.to_rfc3339());
    }

    for record in stocks.iter().take(10) {
        println!(
            "  {:<12} {:>10.2} ({:+.2}%)  {} history points",
            record.ticker,
            record.current_price,
            record.change_percent,
            record.price_history.len()
        );
    }
    if stocks.len() > 10 {
        println!("  ... and {} more", stocks.len() - 10);
    }

    Ok(())
}
