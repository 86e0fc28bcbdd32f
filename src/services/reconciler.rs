//! Batch reconciliation between the upstream sources and the store.
//!
//! Keys are partitioned into consecutive fixed-size chunks. Chunks are
//! fetched strictly in sequence: a chunk's records are merged into the
//! store before the next chunk's fetch starts, with a pause between
//! chunks (not after the last) to respect upstream rate limits. A failed
//! chunk is logged and skipped; there is no retry or backoff, and store
//! records absent from a fetch are left untouched.

use crate::services::fund_source::FundSource;
use crate::services::stock_source::StockSource;
use crate::services::store::MarketStore;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub total_keys: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub fetched: usize,
    pub skipped: usize,
}

pub async fn reconcile_stocks(
    source: &dyn StockSource,
    store: &MarketStore,
    tickers: &[String],
    batch_size: usize,
    inter_batch_delay: Duration,
) -> SyncReport {
    let mut report = SyncReport {
        total_keys: tickers.len(),
        ..Default::default()
    };

    let chunks: Vec<&[String]> = tickers.chunks(batch_size.max(1)).collect();
    let total_batches = chunks.len();

    for (idx, chunk) in chunks.into_iter().enumerate() {
        report.batches += 1;

        match source.fetch_quotes(chunk).await {
            Ok(outcome) => {
                for quote in &outcome.fetched {
                    store.upsert_stock(quote).await;
                }
                for skipped in &outcome.skipped {
                    warn!(symbol = %skipped.symbol, reason = %skipped.reason, "symbol omitted from batch");
                }
                report.fetched += outcome.fetched.len();
                report.skipped += outcome.skipped.len();

                debug!(
                    batch = idx + 1,
                    total_batches,
                    fetched = outcome.fetched.len(),
                    skipped = outcome.skipped.len(),
                    "stock batch merged"
                );
            }
            Err(e) => {
                report.failed_batches += 1;
                error!(
                    batch = idx + 1,
                    total_batches,
                    error = %e,
                    "stock batch fetch failed, continuing with next batch"
                );
            }
        }

        if idx + 1 < total_batches {
            sleep(inter_batch_delay).await;
        }
    }

    report
}

pub async fn reconcile_funds(
    source: &dyn FundSource,
    store: &MarketStore,
    scheme_codes: &[String],
    batch_size: usize,
    inter_batch_delay: Duration,
) -> SyncReport {
    let mut report = SyncReport {
        total_keys: scheme_codes.len(),
        ..Default::default()
    };

    let chunks: Vec<&[String]> = scheme_codes.chunks(batch_size.max(1)).collect();
    let total_batches = chunks.len();

    for (idx, chunk) in chunks.into_iter().enumerate() {
        report.batches += 1;

        match source.fetch_navs(chunk).await {
            Ok(outcome) => {
                for nav in &outcome.fetched {
                    store.upsert_fund(nav).await;
                }
                for skipped in &outcome.skipped {
                    warn!(scheme_code = %skipped.symbol, reason = %skipped.reason, "scheme omitted from batch");
                }
                report.fetched += outcome.fetched.len();
                report.skipped += outcome.skipped.len();

                debug!(
                    batch = idx + 1,
                    total_batches,
                    fetched = outcome.fetched.len(),
                    skipped = outcome.skipped.len(),
                    "fund batch merged"
                );
            }
            Err(e) => {
                report.failed_batches += 1;
                error!(
                    batch = idx + 1,
                    total_batches,
                    error = %e,
                    "fund batch fetch failed, continuing with next batch"
                );
            }
        }

        if idx + 1 < total_batches {
            sleep(inter_batch_delay).await;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::source::{BatchOutcome, SourceError};
    use crate::services::stock_source::StockQuote;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingSource {
        calls: Mutex<Vec<Vec<String>>>,
        fail_batches: Vec<usize>,
    }

    impl RecordingSource {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_batches: Vec::new(),
            }
        }

        fn failing_on(batches: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_batches: batches,
            }
        }

        fn call_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|c| c.len()).collect()
        }
    }

    fn test_quote(ticker: &str) -> StockQuote {
        StockQuote {
            ticker: ticker.to_string(),
            name: String::new(),
            exchange: String::new(),
            price: 10.0,
            previous_close: 9.5,
            change: 0.5,
            change_percent: 5.26,
            volume: 100,
            history: Vec::new(),
        }
    }

    #[async_trait]
    impl StockSource for RecordingSource {
        async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote, SourceError> {
            Ok(test_quote(symbol))
        }

        async fn fetch_quotes(
            &self,
            symbols: &[String],
        ) -> Result<BatchOutcome<StockQuote>, SourceError> {
            let batch_idx = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(symbols.to_vec());
                calls.len() - 1
            };

            if self.fail_batches.contains(&batch_idx) {
                return Err(SourceError::Upstream("connection reset".to_string()));
            }

            let mut outcome = BatchOutcome::new();
            for symbol in symbols {
                outcome.fetched.push(test_quote(symbol));
            }
            Ok(outcome)
        }
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("TICK{i:02}")).collect()
    }

    fn test_store() -> MarketStore {
        MarketStore::new(std::env::temp_dir().join(format!("pennypulse-test-{}", uuid::Uuid::new_v4())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_partitioning_and_pacing() {
        let source = RecordingSource::new();
        let store = test_store();
        let delay = Duration::from_secs(2);

        let started = tokio::time::Instant::now();
        let report = reconcile_stocks(&source, &store, &keys(25), 10, delay).await;

        // ceil(25/10) = 3 calls, each at most 10 keys
        assert_eq!(source.call_sizes(), vec![10, 10, 5]);
        assert_eq!(report.batches, 3);
        assert_eq!(report.fetched, 25);

        // Sleeps between consecutive batches only: 2 pauses, not 3
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_does_not_stop_the_run() {
        let source = RecordingSource::failing_on(vec![1]);
        let store = test_store();

        let report =
            reconcile_stocks(&source, &store, &keys(25), 10, Duration::from_millis(100)).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.fetched, 15);

        // Batches 1 and 3 merged; the failed batch's keys stay untouched
        assert!(store.get_stock("TICK00").await.is_some());
        assert!(store.get_stock("TICK12").await.is_none());
        assert!(store.get_stock("TICK20").await.is_some());
    }

    #[tokio::test]
    async fn test_single_batch_has_no_pause() {
        let source = RecordingSource::new();
        let store = test_store();

        let started = std::time::Instant::now();
        let report =
            reconcile_stocks(&source, &store, &keys(3), 10, Duration::from_secs(5)).await;

        assert_eq!(report.batches, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
