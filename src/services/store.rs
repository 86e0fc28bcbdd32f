//! In-memory market record store with JSON snapshot persistence.
//!
//! Records are keyed by upper-cased ticker (stocks) or scheme code (funds).
//! Merge semantics: scalar fields overwrite, history appends then truncates
//! to its cap keeping the newest entries. Records are never hard-deleted.

use crate::constants::{NAV_HISTORY_CAP, PRICE_HISTORY_CAP, SEED_SCHEME_CODES, SEED_TICKERS};
use crate::error::{AppError, Result};
use crate::models::{merge_history, FundRecord, StockRecord};
use crate::services::fund_source::FundNav;
use crate::services::stock_source::StockQuote;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const STOCKS_SNAPSHOT_FILE: &str = "stocks.json";
const FUNDS_SNAPSHOT_FILE: &str = "funds.json";

pub type SharedMarketStore = Arc<MarketStore>;

pub struct MarketStore {
    stocks: RwLock<HashMap<String, StockRecord>>,
    funds: RwLock<HashMap<String, FundRecord>>,
    data_dir: PathBuf,
}

impl MarketStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            stocks: RwLock::new(HashMap::new()),
            funds: RwLock::new(HashMap::new()),
            data_dir,
        }
    }

    /// Load snapshots from the data directory. Missing files are fine
    /// (first run); unreadable ones are not.
    pub async fn load_snapshots(&self) -> Result<()> {
        if let Some(records) = read_snapshot::<StockRecord>(&self.data_dir.join(STOCKS_SNAPSHOT_FILE)).await? {
            let mut stocks = self.stocks.write().await;
            *stocks = records
                .into_iter()
                .map(|r| (r.ticker.to_uppercase(), r))
                .collect();
        }
        if let Some(records) = read_snapshot::<FundRecord>(&self.data_dir.join(FUNDS_SNAPSHOT_FILE)).await? {
            let mut funds = self.funds.write().await;
            *funds = records
                .into_iter()
                .map(|r| (r.scheme_code.clone(), r))
                .collect();
        }

        let (stock_count, fund_count) = self.record_counts().await;
        info!(stocks = stock_count, funds = fund_count, "snapshots loaded");
        Ok(())
    }

    /// Write both snapshots to the data directory.
    pub async fn save_snapshots(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let stocks: Vec<StockRecord> = self.stocks.read().await.values().cloned().collect();
        let funds: Vec<FundRecord> = self.funds.read().await.values().cloned().collect();

        tokio::fs::write(
            self.data_dir.join(STOCKS_SNAPSHOT_FILE),
            serde_json::to_vec_pretty(&stocks)?,
        )
        .await?;
        tokio::fs::write(
            self.data_dir.join(FUNDS_SNAPSHOT_FILE),
            serde_json::to_vec_pretty(&funds)?,
        )
        .await?;

        debug!(stocks = stocks.len(), funds = funds.len(), "snapshots saved");
        Ok(())
    }

    /// Insert placeholder records for the default universe when the store
    /// starts empty, so the first sync has something to refresh.
    pub async fn seed_defaults(&self) {
        let (stock_count, fund_count) = self.record_counts().await;

        if stock_count == 0 {
            let mut stocks = self.stocks.write().await;
            for ticker in SEED_TICKERS {
                stocks.insert(ticker.to_string(), StockRecord::placeholder(ticker));
            }
            info!(seeded = SEED_TICKERS.len(), "seeded default stock universe");
        }
        if fund_count == 0 {
            let mut funds = self.funds.write().await;
            for code in SEED_SCHEME_CODES {
                funds.insert(code.to_string(), FundRecord::placeholder(code));
            }
            info!(seeded = SEED_SCHEME_CODES.len(), "seeded default fund universe");
        }
    }

    /// Full merge: scalars overwrite, quote history appends then truncates
    /// to the price cap keeping the newest entries.
    pub async fn upsert_stock(&self, quote: &StockQuote) {
        let key = quote.ticker.to_uppercase();
        let mut stocks = self.stocks.write().await;
        let record = stocks
            .entry(key.clone())
            .or_insert_with(|| StockRecord::placeholder(&key));

        apply_quote_scalars(record, quote);
        merge_history(&mut record.price_history, &quote.history, PRICE_HISTORY_CAP);
    }

    /// Scalar-only merge used by the realtime poll; history untouched.
    pub async fn apply_stock_quote(&self, quote: &StockQuote) {
        let key = quote.ticker.to_uppercase();
        let mut stocks = self.stocks.write().await;
        let record = stocks
            .entry(key.clone())
            .or_insert_with(|| StockRecord::placeholder(&key));

        apply_quote_scalars(record, quote);
    }

    pub async fn upsert_fund(&self, nav: &FundNav) {
        let mut funds = self.funds.write().await;
        let record = funds
            .entry(nav.scheme_code.clone())
            .or_insert_with(|| FundRecord::placeholder(&nav.scheme_code));

        apply_nav_scalars(record, nav);
        merge_history(&mut record.nav_history, &nav.history, NAV_HISTORY_CAP);
    }

    /// Insert a newly discovered stock. Returns false when the ticker is
    /// already tracked (existing records are left untouched).
    pub async fn insert_stock_if_absent(&self, quote: &StockQuote) -> bool {
        let key = quote.ticker.to_uppercase();
        let mut stocks = self.stocks.write().await;
        if stocks.contains_key(&key) {
            return false;
        }

        let mut record = StockRecord::placeholder(&key);
        apply_quote_scalars(&mut record, quote);
        merge_history(&mut record.price_history, &quote.history, PRICE_HISTORY_CAP);
        stocks.insert(key, record);
        true
    }

    pub async fn get_stock(&self, ticker: &str) -> Option<StockRecord> {
        self.stocks.read().await.get(&ticker.to_uppercase()).cloned()
    }

    pub async fn get_fund(&self, scheme_code: &str) -> Option<FundRecord> {
        self.funds.read().await.get(scheme_code).cloned()
    }

    pub async fn stock_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.stocks.read().await.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub async fn fund_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.funds.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub async fn list_stocks(&self) -> Vec<StockRecord> {
        let mut records: Vec<StockRecord> = self.stocks.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        records
    }

    pub async fn list_funds(&self) -> Vec<FundRecord> {
        let mut records: Vec<FundRecord> = self.funds.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.scheme_code.cmp(&b.scheme_code));
        records
    }

    pub async fn record_counts(&self) -> (usize, usize) {
        (self.stocks.read().await.len(), self.funds.read().await.len())
    }
}

fn apply_quote_scalars(record: &mut StockRecord, quote: &StockQuote) {
    record.current_price = quote.price;
    record.previous_price = quote.previous_close;
    record.change = quote.change;
    record.change_percent = quote.change_percent;
    record.volume = quote.volume;
    record.last_updated = Utc::now();
    if !quote.name.is_empty() {
        record.name = quote.name.clone();
    }
    if !quote.exchange.is_empty() {
        record.exchange = quote.exchange.clone();
    }
}

fn apply_nav_scalars(record: &mut FundRecord, nav: &FundNav) {
    record.current_nav = nav.nav;
    record.previous_nav = nav.previous_nav;
    record.change = nav.change;
    record.change_percent = nav.change_percent;
    record.last_updated = Utc::now();
    if !nav.scheme_name.is_empty() {
        record.scheme_name = nav.scheme_name.clone();
    }
    if !nav.fund_house.is_empty() {
        record.fund_house = nav.fund_house.clone();
    }
}

async fn read_snapshot<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<Option<Vec<T>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let records: Vec<T> = serde_json::from_slice(&bytes)?;
            Ok(Some(records))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot read failed");
            Err(AppError::Io(e.to_string()))
        }
    }
}
