use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single dated value inside a record's bounded history sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Calendar date of the observation
    pub date: NaiveDate,

    /// Closing price or NAV on that date
    pub value: f64,
}

impl HistoryPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }

    /// A point may enter a history sequence only with a finite,
    /// strictly positive value.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}

/// Merge incoming points into an existing history sequence.
///
/// Invalid incoming points are excluded before anything else. For a
/// duplicate date the incoming value wins. The result is sorted ascending
/// by date and truncated to `cap` entries, dropping the oldest first.
/// Merging the same input twice leaves the sequence unchanged.
pub fn merge_history(existing: &mut Vec<HistoryPoint>, incoming: &[HistoryPoint], cap: usize) {
    let mut by_date: BTreeMap<NaiveDate, f64> =
        existing.iter().map(|p| (p.date, p.value)).collect();

    for point in incoming.iter().filter(|p| p.is_valid()) {
        by_date.insert(point.date, point.value);
    }

    let mut merged: Vec<HistoryPoint> = by_date
        .into_iter()
        .map(|(date, value)| HistoryPoint { date, value })
        .collect();

    if merged.len() > cap {
        let excess = merged.len() - cap;
        merged.drain(..excess);
    }

    *existing = merged;
}

/// A tracked stock, keyed by its upper-cased ticker.
///
/// Created once (seed or discovery) and mutated by the sync pipeline and
/// the realtime broadcast; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    /// Ticker symbol, upper-cased, without exchange suffix (e.g. "IDEA")
    pub ticker: String,

    /// Company name as reported by the data source
    pub name: String,

    /// Listing exchange (e.g. "NSI")
    pub exchange: String,

    /// Latest traded price in INR
    pub current_price: f64,

    /// Previous session close in INR
    pub previous_price: f64,

    /// Absolute change since previous close
    pub change: f64,

    /// Percent change since previous close
    pub change_percent: f64,

    /// Latest session volume (number of shares)
    pub volume: u64,

    /// When the scalar fields were last refreshed
    pub last_updated: DateTime<Utc>,

    /// Daily closes, date ascending, capped at `PRICE_HISTORY_CAP`
    pub price_history: Vec<HistoryPoint>,
}

impl StockRecord {
    /// Create an empty record for a ticker that has not been quoted yet.
    pub fn placeholder(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            name: String::new(),
            exchange: String::new(),
            current_price: 0.0,
            previous_price: 0.0,
            change: 0.0,
            change_percent: 0.0,
            volume: 0,
            last_updated: Utc::now(),
            price_history: Vec::new(),
        }
    }
}

/// A tracked mutual fund, keyed by its scheme code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRecord {
    /// Scheme code as issued by the fund registrar (e.g. "120503")
    pub scheme_code: String,

    /// Scheme name as reported by the data source
    pub scheme_name: String,

    /// Asset management company
    pub fund_house: String,

    /// Latest published NAV in INR
    pub current_nav: f64,

    /// Previous published NAV in INR
    pub previous_nav: f64,

    /// Absolute change since the previous NAV
    pub change: f64,

    /// Percent change since the previous NAV
    pub change_percent: f64,

    /// When the scalar fields were last refreshed
    pub last_updated: DateTime<Utc>,

    /// Daily NAVs, date ascending, capped at `NAV_HISTORY_CAP`
    pub nav_history: Vec<HistoryPoint>,
}

impl FundRecord {
    pub fn placeholder(scheme_code: &str) -> Self {
        Self {
            scheme_code: scheme_code.to_string(),
            scheme_name: String::new(),
            fund_house: String::new(),
            current_nav: 0.0,
            previous_nav: 0.0,
            change: 0.0,
            change_percent: 0.0,
            last_updated: Utc::now(),
            nav_history: Vec::new(),
        }
    }
}
