//! Stock quote adapter against the upstream chart API.
//!
//! Indian tickers are queried with the NSE suffix (e.g. `IDEA.NS`) and
//! normalized back to the bare upper-cased symbol used as the store key.

use crate::constants::UPSTREAM_TIMEOUT_SECS;
use crate::models::HistoryPoint;
use crate::services::market_hours::MARKET_TIMEZONE;
use crate::services::source::{BatchOutcome, SkipReason, SourceError};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Quote snapshot for one listed stock, normalized from the upstream
/// chart payload.
#[derive(Debug, Clone)]
pub struct StockQuote {
    /// Bare upper-cased ticker, exchange suffix stripped
    pub ticker: String,
    pub name: String,
    pub exchange: String,
    pub price: f64,
    pub previous_close: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    /// Recent daily closes, date ascending
    pub history: Vec<HistoryPoint>,
}

/// Upstream source of stock quotes.
#[async_trait]
pub trait StockSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote, SourceError>;

    /// Best-effort batch fetch. Per-symbol failures are recorded in the
    /// outcome's `skipped` list; an `Err` means the batch as a whole could
    /// not be attempted.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<BatchOutcome<StockQuote>, SourceError>;
}

pub struct QuoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl QuoteClient {
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: "https://query1.finance.yahoo.com".to_string(),
        })
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}.NS?range=3mo&interval=1d",
            self.base_url,
            normalize_ticker(symbol)
        )
    }
}

#[async_trait]
impl StockSource for QuoteClient {
    async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote, SourceError> {
        let url = self.chart_url(symbol);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(symbol.to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Upstream(format!(
                "chart request for {} returned status {}",
                symbol,
                response.status()
            )));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidPayload(e.to_string()))?;

        quote_from_chart(symbol, body)
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<BatchOutcome<StockQuote>, SourceError> {
        let mut outcome = BatchOutcome::new();

        for symbol in symbols {
            match self.fetch_quote(symbol).await {
                Ok(quote) => outcome.fetched.push(quote),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "quote fetch failed, symbol skipped");
                    outcome.skip(symbol.clone(), SkipReason::from_error(&e));
                }
            }
        }

        debug!(
            requested = symbols.len(),
            fetched = outcome.fetched.len(),
            skipped = outcome.skipped.len(),
            "quote batch completed"
        );

        Ok(outcome)
    }
}

/// Strip the exchange suffix and upper-case the symbol.
pub fn normalize_ticker(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    upper
        .strip_suffix(".NS")
        .or_else(|| upper.strip_suffix(".BO"))
        .unwrap_or(&upper)
        .to_string()
}

fn quote_from_chart(symbol: &str, body: ChartResponse) -> Result<StockQuote, SourceError> {
    if let Some(err) = body.chart.error {
        return Err(SourceError::Upstream(format!(
            "{}: {}",
            err.code, err.description
        )));
    }

    let result = body
        .chart
        .result
        .and_then(|mut results| if results.is_empty() { None } else { Some(results.remove(0)) })
        .ok_or_else(|| SourceError::NotFound(symbol.to_string()))?;

    let price = result
        .meta
        .regular_market_price
        .ok_or_else(|| SourceError::InvalidPayload(format!("{}: missing market price", symbol)))?;
    let previous_close = result.meta.chart_previous_close.unwrap_or(price);

    let change = price - previous_close;
    let change_percent = if previous_close > 0.0 {
        change / previous_close * 100.0
    } else {
        0.0
    };

    let closes = result
        .indicators
        .quote
        .first()
        .and_then(|q| q.close.as_deref())
        .unwrap_or(&[]);
    let timestamps = result.timestamp.as_deref().unwrap_or(&[]);

    // Daily closes keyed by exchange-local calendar date. Null or
    // non-positive closes never enter the history.
    let mut history: Vec<HistoryPoint> = Vec::new();
    for (ts, close) in timestamps.iter().zip(closes.iter()) {
        let Some(value) = close else { continue };
        let Some(instant) = DateTime::from_timestamp(*ts, 0) else {
            warn!(symbol = %symbol, timestamp = ts, "unparseable history timestamp dropped");
            continue;
        };
        let point = HistoryPoint::new(instant.with_timezone(&MARKET_TIMEZONE).date_naive(), *value);
        if point.is_valid() {
            history.push(point);
        }
    }

    let name = result
        .meta
        .long_name
        .or(result.meta.short_name)
        .unwrap_or_default();

    Ok(StockQuote {
        ticker: normalize_ticker(&result.meta.symbol),
        name,
        exchange: result.meta.exchange_name.unwrap_or_default(),
        price,
        previous_close,
        change,
        change_percent,
        volume: result.meta.regular_market_volume.unwrap_or(0),
        history,
    })
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: String,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_volume: Option<u64>,
    long_name: Option<String>,
    short_name: Option<String>,
    exchange_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    close: Option<Vec<Option<f64>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_body(price: f64, closes: serde_json::Value, timestamps: serde_json::Value) -> ChartResponse {
        serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "IDEA.NS",
                        "regularMarketPrice": price,
                        "chartPreviousClose": 8.0,
                        "regularMarketVolume": 1_250_000u64,
                        "longName": "Vodafone Idea Limited",
                        "exchangeName": "NSI"
                    },
                    "timestamp": timestamps,
                    "indicators": { "quote": [{ "close": closes }] }
                }],
                "error": null
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_ticker_strips_suffix() {
        assert_eq!(normalize_ticker("idea.ns"), "IDEA");
        assert_eq!(normalize_ticker("SUZLON.BO"), "SUZLON");
        assert_eq!(normalize_ticker("sbin"), "SBIN");
    }

    #[test]
    fn test_quote_from_chart_scalars() {
        // 2024-03-04 and 2024-03-05 in IST (epoch seconds at 05:30 IST)
        let body = chart_body(8.4, json!([8.1, 8.4]), json!([1_709_510_400i64, 1_709_596_800i64]));
        let quote = quote_from_chart("IDEA", body).unwrap();

        assert_eq!(quote.ticker, "IDEA");
        assert_eq!(quote.exchange, "NSI");
        assert_eq!(quote.volume, 1_250_000);
        assert!((quote.change - 0.4).abs() < 1e-9);
        assert!((quote.change_percent - 5.0).abs() < 1e-9);
        assert_eq!(quote.history.len(), 2);
        assert!(quote.history[0].date < quote.history[1].date);
    }

    #[test]
    fn test_quote_from_chart_drops_null_and_invalid_closes() {
        let body = chart_body(
            8.4,
            json!([8.1, null, 0.0, 8.4]),
            json!([1_709_510_400i64, 1_709_596_800i64, 1_709_683_200i64, 1_709_769_600i64]),
        );
        let quote = quote_from_chart("IDEA", body).unwrap();

        assert_eq!(quote.history.len(), 2);
    }

    #[test]
    fn test_quote_from_chart_missing_price_is_invalid_payload() {
        let body: ChartResponse = serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "meta": { "symbol": "IDEA.NS" },
                    "timestamp": null,
                    "indicators": { "quote": [] }
                }],
                "error": null
            }
        }))
        .unwrap();

        assert!(matches!(
            quote_from_chart("IDEA", body),
            Err(SourceError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_quote_from_chart_empty_result_is_not_found() {
        let body: ChartResponse =
            serde_json::from_value(json!({ "chart": { "result": [], "error": null } })).unwrap();

        assert!(matches!(
            quote_from_chart("XXXX", body),
            Err(SourceError::NotFound(_))
        ));
    }
}
