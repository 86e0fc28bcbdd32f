pub mod discovery;
pub mod fund_source;
pub mod market_hours;
pub mod reconciler;
pub mod source;
pub mod stock_source;
pub mod store;

pub use discovery::{discover_penny_stocks, DiscoveryReport};
pub use fund_source::{FundNav, FundSource, NavClient};
pub use reconciler::{reconcile_funds, reconcile_stocks, SyncReport};
pub use source::{BatchOutcome, SkipReason, SkippedSymbol, SourceError};
pub use stock_source::{QuoteClient, StockQuote, StockSource};
pub use store::{MarketStore, SharedMarketStore};
