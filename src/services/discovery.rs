//! Weekly discovery probe over a fixed candidate universe.
//!
//! Candidates trading below the penny threshold that are not already
//! tracked get inserted into the store; everything else is left alone.

use crate::constants::{INTER_BATCH_DELAY_MS, STOCK_BATCH_SIZE};
use crate::services::stock_source::StockSource;
use crate::services::store::MarketStore;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

/// Summary of one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub probed: usize,
    pub added: Vec<String>,
    pub skipped: usize,
}

pub async fn discover_penny_stocks(
    source: &dyn StockSource,
    store: &MarketStore,
    candidates: &[String],
    price_threshold: f64,
) -> DiscoveryReport {
    let mut report = DiscoveryReport {
        probed: candidates.len(),
        ..Default::default()
    };

    let chunks: Vec<&[String]> = candidates.chunks(STOCK_BATCH_SIZE).collect();
    let total_batches = chunks.len();

    for (idx, chunk) in chunks.into_iter().enumerate() {
        match source.fetch_quotes(chunk).await {
            Ok(outcome) => {
                report.skipped += outcome.skipped.len();
                for quote in &outcome.fetched {
                    if quote.price >= price_threshold {
                        continue;
                    }
                    if store.insert_stock_if_absent(quote).await {
                        info!(ticker = %quote.ticker, price = quote.price, "discovered penny stock");
                        report.added.push(quote.ticker.clone());
                    }
                }
            }
            Err(e) => {
                error!(batch = idx + 1, total_batches, error = %e, "discovery batch failed");
            }
        }

        if idx + 1 < total_batches {
            sleep(Duration::from_millis(INTER_BATCH_DELAY_MS)).await;
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
    use std::collections::HashMap;

    struct FixedPriceSource {
        prices: HashMap<String, f64>,
    }

    fn quote(ticker: &str, price: f64) -> StockQuote {
        StockQuote {
            ticker: ticker.to_string(),
            name: String::new(),
            exchange: String::new(),
            price,
            previous_close: price,
            change: 0.0,
            change_percent: 0.0,
            volume: 0,
            history: Vec::new(),
        }
    }

    #[async_trait]
    impl StockSource for FixedPriceSource {
        async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote, SourceError> {
            self.prices
                .get(symbol)
                .map(|&p| quote(symbol, p))
                .ok_or_else(|| SourceError::NotFound(symbol.to_string()))
        }

        async fn fetch_quotes(
            &self,
            symbols: &[String],
        ) -> Result<BatchOutcome<StockQuote>, SourceError> {
            let mut outcome = BatchOutcome::new();
            for symbol in symbols {
                match self.fetch_quote(symbol).await {
                    Ok(q) => outcome.fetched.push(q),
                    Err(e) => outcome.skip(
                        symbol.clone(),
                        crate::services::source::SkipReason::from_error(&e),
                    ),
                }
            }
            Ok(outcome)
        }
    }

    fn test_store() -> MarketStore {
        MarketStore::new(std::env::temp_dir().join(format!("pennypulse-test-{}", uuid::Uuid::new_v4())))
    }

    #[tokio::test]
    async fn test_discovery_inserts_only_new_penny_stocks() {
        let source = FixedPriceSource {
            prices: HashMap::from([
                ("IDEA".to_string(), 8.4),      // penny, new -> added
                ("TRIDENT".to_string(), 120.0), // above threshold -> ignored
                ("SUZLON".to_string(), 42.0),   // penny, already tracked -> ignored
            ]),
        };
        let store = test_store();
        store.insert_stock_if_absent(&quote("SUZLON", 41.0)).await;

        let candidates: Vec<String> = ["IDEA", "TRIDENT", "SUZLON", "GHOST"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = discover_penny_stocks(&source, &store, &candidates, 50.0).await;

        assert_eq!(report.added, vec!["IDEA".to_string()]);
        assert_eq!(report.probed, 4);
        assert_eq!(report.skipped, 1); // GHOST not found upstream

        // Existing record not overwritten by the probe
        assert_eq!(store.get_stock("SUZLON").await.unwrap().current_price, 41.0);
    }
}
