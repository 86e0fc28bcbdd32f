//! Mutual fund NAV adapter against the upstream fund registry API.
//!
//! NAV rows arrive newest-first with day-month-year date strings
//! ("05-03-2024" is 5 March 2024) and NAV values as decimal strings.

use crate::constants::UPSTREAM_TIMEOUT_SECS;
use crate::models::HistoryPoint;
use crate::services::source::{BatchOutcome, SkipReason, SourceError};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// NAV snapshot for one mutual fund scheme.
#[derive(Debug, Clone)]
pub struct FundNav {
    pub scheme_code: String,
    pub scheme_name: String,
    pub fund_house: String,
    pub nav: f64,
    pub previous_nav: f64,
    pub change: f64,
    pub change_percent: f64,
    pub nav_date: NaiveDate,
    /// Published NAVs, date ascending
    pub history: Vec<HistoryPoint>,
}

/// Upstream source of mutual fund NAVs.
#[async_trait]
pub trait FundSource: Send + Sync {
    async fn fetch_nav(&self, scheme_code: &str) -> Result<FundNav, SourceError>;

    /// Best-effort batch fetch; failed scheme codes land in `skipped`.
    async fn fetch_navs(&self, scheme_codes: &[String]) -> Result<BatchOutcome<FundNav>, SourceError>;
}

pub struct NavClient {
    client: reqwest::Client,
    base_url: String,
}

impl NavClient {
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.mfapi.in".to_string(),
        })
    }
}

#[async_trait]
impl FundSource for NavClient {
    async fn fetch_nav(&self, scheme_code: &str) -> Result<FundNav, SourceError> {
        let url = format!("{}/mf/{}", self.base_url, scheme_code.trim());
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(scheme_code.to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Upstream(format!(
                "NAV request for {} returned status {}",
                scheme_code,
                response.status()
            )));
        }

        let body: NavResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidPayload(e.to_string()))?;

        let nav = nav_from_response(scheme_code, body)?;
        debug!(scheme_code = %nav.scheme_code, nav = nav.nav, nav_date = %nav.nav_date, "NAV fetched");
        Ok(nav)
    }

    async fn fetch_navs(&self, scheme_codes: &[String]) -> Result<BatchOutcome<FundNav>, SourceError> {
        let mut outcome = BatchOutcome::new();

        for code in scheme_codes {
            match self.fetch_nav(code).await {
                Ok(nav) => outcome.fetched.push(nav),
                Err(e) => {
                    warn!(scheme_code = %code, error = %e, "NAV fetch failed, scheme skipped");
                    outcome.skip(code.clone(), SkipReason::from_error(&e));
                }
            }
        }

        debug!(
            requested = scheme_codes.len(),
            fetched = outcome.fetched.len(),
            skipped = outcome.skipped.len(),
            "NAV batch completed"
        );

        Ok(outcome)
    }
}

/// Parse an upstream NAV date. The format is day-month-year.
pub(crate) fn parse_nav_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%m-%Y").ok()
}

fn nav_from_response(scheme_code: &str, body: NavResponse) -> Result<FundNav, SourceError> {
    if body.data.is_empty() {
        return Err(SourceError::NotFound(scheme_code.to_string()));
    }

    // Rows arrive newest-first. A row with an unparseable date or a
    // non-positive NAV is dropped rather than recorded under a guessed
    // date; the raw string is kept in the log for diagnosis.
    let mut newest_first: Vec<HistoryPoint> = Vec::new();
    for row in &body.data {
        let Some(date) = parse_nav_date(&row.date) else {
            warn!(scheme_code = %scheme_code, raw_date = %row.date, "unparseable NAV date, point dropped");
            continue;
        };
        let Ok(value) = row.nav.trim().parse::<f64>() else {
            warn!(scheme_code = %scheme_code, raw_nav = %row.nav, "unparseable NAV value, point dropped");
            continue;
        };
        let point = HistoryPoint::new(date, value);
        if point.is_valid() {
            newest_first.push(point);
        }
    }

    let current = *newest_first
        .first()
        .ok_or_else(|| SourceError::InvalidPayload(format!("{}: no valid NAV rows", scheme_code)))?;
    let previous = newest_first.get(1).copied().unwrap_or(current);

    let change = current.value - previous.value;
    let change_percent = if previous.value > 0.0 {
        change / previous.value * 100.0
    } else {
        0.0
    };

    let mut history = newest_first;
    history.reverse();

    Ok(FundNav {
        scheme_code: scheme_code.trim().to_string(),
        scheme_name: body.meta.scheme_name,
        fund_house: body.meta.fund_house,
        nav: current.value,
        previous_nav: previous.value,
        change,
        change_percent,
        nav_date: current.date,
        history,
    })
}

#[derive(Debug, Deserialize)]
struct NavResponse {
    #[serde(default)]
    meta: NavMeta,
    #[serde(default)]
    data: Vec<NavRow>,
}

#[derive(Debug, Default, Deserialize)]
struct NavMeta {
    #[serde(default)]
    fund_house: String,
    #[serde(default)]
    scheme_name: String,
}

#[derive(Debug, Deserialize)]
struct NavRow {
    date: String,
    nav: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(rows: serde_json::Value) -> NavResponse {
        serde_json::from_value(json!({
            "meta": {
                "fund_house": "Quantum Mutual Fund",
                "scheme_name": "Quantum Small Cap Fund - Direct Plan"
            },
            "data": rows
        }))
        .unwrap()
    }

    #[test]
    fn test_nav_date_is_day_month_year() {
        assert_eq!(
            parse_nav_date("05-03-2024"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(parse_nav_date("31-01-2024"), NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_unparseable_date_is_rejected() {
        assert_eq!(parse_nav_date("2024-03-05"), None);
        assert_eq!(parse_nav_date("garbage"), None);
    }

    #[test]
    fn test_nav_from_response_scalars_and_history_order() {
        let body = response(json!([
            { "date": "05-03-2024", "nav": "10.50" },
            { "date": "04-03-2024", "nav": "10.00" },
            { "date": "01-03-2024", "nav": "9.80" }
        ]));
        let nav = nav_from_response("152075", body).unwrap();

        assert_eq!(nav.nav, 10.5);
        assert_eq!(nav.previous_nav, 10.0);
        assert!((nav.change_percent - 5.0).abs() < 1e-9);
        assert_eq!(nav.nav_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(nav.history.len(), 3);
        assert!(nav.history[0].date < nav.history[2].date);
        assert_eq!(nav.fund_house, "Quantum Mutual Fund");
    }

    #[test]
    fn test_nav_rows_with_bad_date_or_value_are_dropped() {
        let body = response(json!([
            { "date": "05-03-2024", "nav": "10.50" },
            { "date": "not-a-date", "nav": "10.00" },
            { "date": "03-03-2024", "nav": "n/a" },
            { "date": "02-03-2024", "nav": "-1.0" }
        ]));
        let nav = nav_from_response("152075", body).unwrap();

        assert_eq!(nav.history.len(), 1);
        assert_eq!(nav.previous_nav, nav.nav);
    }

    #[test]
    fn test_empty_data_is_not_found() {
        let body = response(json!([]));
        assert!(matches!(
            nav_from_response("000000", body),
            Err(SourceError::NotFound(_))
        ));
    }
}
