//! JSON wire protocol for the realtime WebSocket channel.
//!
//! Frames are text messages with a `type` discriminator. Unknown or
//! malformed frames are answered with an `error` frame; the connection
//! stays open.

use crate::services::stock_source::StockQuote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client -> server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        tickers: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        tickers: Vec<String>,
    },
    Ping,
}

/// Server -> client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        client_id: String,
        message: String,
    },
    SubscriptionSuccess {
        tickers: Vec<String>,
    },
    UnsubscriptionSuccess {
        tickers: Vec<String>,
    },
    PriceUpdate {
        data: PriceUpdateData,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

/// Payload of a `price_update` frame.
#[derive(Debug, Clone, Serialize)]
pub struct PriceUpdateData {
    pub ticker: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdateData {
    pub fn from_quote(quote: &StockQuote) -> Self {
        Self {
            ticker: quote.ticker.clone(),
            price: quote.price,
            change: quote.change,
            change_percent: quote.change_percent,
            volume: quote.volume,
            timestamp: Utc::now(),
        }
    }
}
