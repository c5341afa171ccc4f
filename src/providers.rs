//! Upstream data provider contracts (spec §4.3, §6): `PriceDataProvider`,
//! `FundamentalDataProvider`, `UniverseProvider`, plus normalized adapter
//! helpers grounded in `core/data_collector/stock/daily_quotes.py` and
//! `core/data_collector/index/quotes.py`.

pub mod equity;
pub mod index;

use crate::backtest::config::BacktestConfig;
use crate::error::Error;
use crate::panel::Panel;
use crate::quote::Quote;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[async_trait]
pub trait PriceDataProvider: Send + Sync {
    /// Returns a two-level `(date, symbol)` panel. Must return empty, not
    /// an error, when no data is available.
    async fn load(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        fields: Option<&[String]>,
    ) -> Result<Panel, Error>;
}

#[async_trait]
pub trait FundamentalDataProvider: Send + Sync {
    /// Returns a table keyed by symbol containing requested attributes.
    async fn load(&self, symbols: &[String], attributes: Option<&[String]>) -> Result<BTreeMap<String, BTreeMap<String, f64>>, Error>;
}

#[async_trait]
pub trait UniverseProvider: Send + Sync {
    async fn call(&self, config: &BacktestConfig) -> Result<Vec<String>, Error>;
}

/// A provider of fully-normalized, per-row quote data for one symbol at a
/// time — the shape the ingestion orchestrator needs to persist through
/// `quote::QuoteService`, as opposed to [`PriceDataProvider`]'s
/// multi-symbol `Panel` shape used by the backtest engine. Implemented by
/// `providers::equity::EquityProvider` and `providers::index::IndexProvider`.
#[async_trait]
pub trait RawQuoteProvider: Send + Sync {
    /// Returns an empty vec, not an error, when no source has data.
    async fn fetch_rows(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<RawQuoteRow>;
}

/// One normalized quote row as returned by an upstream adapter (spec §6
/// upstream provider protocol).
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuoteRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: Option<f64>,
    pub turnover_amount: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub adj_factor: Option<f64>,
    pub vwap: Option<f64>,
    pub currency: Option<String>,
    pub source: String,
}

/// Converts one normalized row into a persistable [`Quote`], rounding
/// `volume` to the nearest whole share and carrying the derived
/// `adj_factor`/`vwap` fields through rather than discarding them.
pub fn row_to_quote(symbol: &str, row: &RawQuoteRow) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        date: row.date,
        open: Decimal::from_f64(row.open).unwrap_or_default(),
        high: Decimal::from_f64(row.high).unwrap_or_default(),
        low: Decimal::from_f64(row.low).unwrap_or_default(),
        close: Decimal::from_f64(row.close).unwrap_or_default(),
        adj_close: row.adj_close.and_then(Decimal::from_f64),
        volume: row.volume.map(|v| v.round() as i64),
        turnover_amount: row.turnover_amount.and_then(Decimal::from_f64),
        turnover_rate: row.turnover_rate.and_then(Decimal::from_f64),
        vwap: row.vwap.and_then(Decimal::from_f64),
        adj_factor: row.adj_factor.and_then(Decimal::from_f64),
        currency: row.currency.clone(),
        source: Some(row.source.clone()),
    }
}

/// Per-call retry with exponential backoff + jitter (spec §4.3 default: 3
/// attempts, 0.25s base) around a fallible fetch closure. Returns an empty
/// vec on persistent failure rather than propagating the error — only the
/// orchestrator decides whether to advance to the next source.
pub async fn retry_fetch<T, F, Fut>(symbol: &str, source: &str, mut fetch: F) -> Vec<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>, String>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let base = std::time::Duration::from_millis(250);

    for attempt in 1..=MAX_ATTEMPTS {
        match fetch().await {
            Ok(rows) => return rows,
            Err(message) => {
                tracing::warn!(symbol, source, attempt, error = %message, "provider fetch failed");
                if attempt == MAX_ATTEMPTS {
                    return Vec::new();
                }
                tokio::time::sleep(crate::repository::backoff_delay(attempt, base)).await;
            }
        }
    }
    Vec::new()
}

/// Ordered fallback source chain (spec §4.3: "primary,fallback1,fallback2").
/// Tries each source until one returns a non-empty frame; returns the
/// winning source's rows tagged with its own `source` field.
pub async fn fetch_with_fallback<F, Fut>(symbol: &str, sources: &[String], mut fetch_from: F) -> Vec<RawQuoteRow>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Vec<RawQuoteRow>>,
{
    for source in sources {
        let rows = fetch_from(source.clone()).await;
        if !rows.is_empty() {
            return rows;
        }
        tracing::info!(symbol, source, "source returned no data, trying next");
    }
    Vec::new()
}
