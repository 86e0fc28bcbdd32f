//! Shared contract types for the upstream market data adapters.
//!
//! Batch fetches are best-effort: a symbol that fails is recorded in the
//! outcome's `skipped` list with its reason instead of failing the batch,
//! so callers can assert on omissions deliberately rather than by absence.

use crate::error::AppError;
use thiserror::Error;

/// Failure taxonomy for a single upstream fetch.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("symbol not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(s) => AppError::NotFound(s),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

/// Why a symbol was omitted from a batch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Upstream(String),
    InvalidPayload(String),
}

impl SkipReason {
    pub fn from_error(err: &SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => SkipReason::NotFound,
            SourceError::Network(e) => SkipReason::Upstream(e.to_string()),
            SourceError::Upstream(s) => SkipReason::Upstream(s.clone()),
            SourceError::InvalidPayload(s) => SkipReason::InvalidPayload(s.clone()),
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "not found"),
            SkipReason::Upstream(s) => write!(f, "upstream: {}", s),
            SkipReason::InvalidPayload(s) => write!(f, "invalid payload: {}", s),
        }
    }
}

/// A symbol omitted from a batch, with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

/// Result of a best-effort batch fetch.
///
/// A partial batch is a success at this layer; per-symbol failures land in
/// `skipped` and are never propagated as a batch failure.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub fetched: Vec<T>,
    pub skipped: Vec<SkippedSymbol>,
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        Self {
            fetched: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn skip(&mut self, symbol: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedSymbol {
            symbol: symbol.into(),
            reason,
        });
    }
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_from_error() {
        let err = SourceError::NotFound("IDEA".to_string());
        assert_eq!(SkipReason::from_error(&err), SkipReason::NotFound);

        let err = SourceError::Upstream("503".to_string());
        assert_eq!(
            SkipReason::from_error(&err),
            SkipReason::Upstream("503".to_string())
        );
    }

    #[test]
    fn test_batch_outcome_records_skips() {
        let mut outcome: BatchOutcome<()> = BatchOutcome::new();
        outcome.skip("SBIN", SkipReason::NotFound);

        assert!(outcome.fetched.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].symbol, "SBIN");
    }
}
