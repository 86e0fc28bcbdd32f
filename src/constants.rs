//! Tunables for the sync pipeline and realtime broadcast.
//!
//! History caps and batch pacing mirror what the upstream data sources
//! tolerate; everything here is a compile-time default, with the data
//! directory being the only environment-driven setting (see `utils.rs`).

use chrono::Weekday;

/// Maximum number of daily price points retained per stock.
///
/// On merge, older points beyond the cap are dropped and the newest kept.
pub const PRICE_HISTORY_CAP: usize = 90;

/// Maximum number of daily NAV points retained per mutual fund.
pub const NAV_HISTORY_CAP: usize = 365;

/// Number of tickers fetched per upstream batch during a stock sync.
pub const STOCK_BATCH_SIZE: usize = 10;

/// Number of scheme codes fetched per upstream batch during a fund sync.
pub const FUND_BATCH_SIZE: usize = 5;

/// Pause between consecutive batches, in milliseconds.
///
/// The upstream quote API throttles bursts; batches are strictly
/// sequential and separated by this delay (no sleep after the last batch).
pub const INTER_BATCH_DELAY_MS: u64 = 2_000;

/// Cadence of the stock sync trigger. The trigger only executes inside the
/// trading window; outside it the tick is a no-op.
pub const STOCK_SYNC_INTERVAL_SECS: u64 = 300;

/// Cadence of the realtime broadcast poll over subscribed tickers.
pub const BROADCAST_INTERVAL_SECS: u64 = 30;

/// Cadence of the WebSocket ping/pong liveness check.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Outbound HTTP timeout for upstream data sources.
pub const UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// A stock qualifies as a penny stock when it trades below this price (INR).
pub const PENNY_PRICE_THRESHOLD: f64 = 50.0;

/// Daily mutual-fund sync time, exchange-local (IST). NAVs are published
/// after market close, so this runs in the evening.
pub const FUND_SYNC_HOUR: u32 = 18;
pub const FUND_SYNC_MINUTE: u32 = 30;

/// Weekly discovery probe time, exchange-local (IST).
pub const DISCOVERY_WEEKDAY: Weekday = Weekday::Sat;
pub const DISCOVERY_HOUR: u32 = 8;
pub const DISCOVERY_MINUTE: u32 = 0;

/// Tickers tracked out of the box when the store starts empty.
pub const SEED_TICKERS: &[&str] = &["IDEA", "YESBANK", "SUZLON", "RPOWER", "JPPOWER", "SOUTHBANK"];

/// Scheme codes tracked out of the box when the store starts empty.
pub const SEED_SCHEME_CODES: &[&str] = &["120503", "118989", "125497", "130503"];

/// Candidate universe probed by the weekly discovery sync. Candidates whose
/// quote falls below `PENNY_PRICE_THRESHOLD` and are not already tracked get
/// inserted into the store.
pub const DISCOVERY_CANDIDATES: &[&str] = &[
    "IDEA",
    "YESBANK",
    "SUZLON",
    "RPOWER",
    "JPPOWER",
    "PNB",
    "IOB",
    "UCOBANK",
    "CENTRALBK",
    "MAHABANK",
    "NHPC",
    "SJVN",
    "IRFC",
    "GTLINFRA",
    "RTNPOWER",
    "TRIDENT",
    "SOUTHBANK",
    "IDFCFIRSTB",
];
