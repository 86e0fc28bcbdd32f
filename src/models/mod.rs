mod market_record;

pub use market_record::{merge_history, FundRecord, HistoryPoint, StockRecord};
