//! Index/ETF adapter: maps a unified symbol to an ordered list of
//! `(source, upstream_ticker)` pairs and tries each until one succeeds.
//! Grounded in `core/data_collector/index/quotes.py`'s source table
//! (e.g. `"US:SPX" -> [("yfinance", "^GSPC")]`).

use super::{retry_fetch, PriceDataProvider, RawQuoteProvider, RawQuoteRow};
use crate::error::Error;
use crate::panel::Panel;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Static routing table: unified symbol -> ordered upstream candidates.
#[derive(Debug, Clone, Default)]
pub struct IndexSymbolMap {
    routes: BTreeMap<String, Vec<(String, String)>>,
}

impl IndexSymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, unified_symbol: &str, source: &str, upstream_ticker: &str) -> Self {
        self.routes.entry(unified_symbol.to_string()).or_default().push((source.to_string(), upstream_ticker.to_string()));
        self
    }

    pub fn candidates(&self, unified_symbol: &str) -> &[(String, String)] {
        self.routes.get(unified_symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A [`PriceDataProvider`] for index/ETF symbols with a fixed fallback
/// source chain per symbol (spec §4.3's `index_quote_sources`).
pub struct IndexProvider<F> {
    pub symbol_map: IndexSymbolMap,
    fetch_one: F,
}

impl<F, Fut> IndexProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<RawQuoteRow>, String>> + Send,
{
    pub fn new(symbol_map: IndexSymbolMap, fetch_one: F) -> Self {
        Self { symbol_map, fetch_one }
    }
}

#[async_trait]
impl<F, Fut> RawQuoteProvider for IndexProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<RawQuoteRow>, String>> + Send,
{
    /// Tries each routed candidate in order until one returns rows,
    /// restricted to `[start, end]` (spec §4.3's `index_quote_sources`).
    async fn fetch_rows(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<RawQuoteRow> {
        let candidates = self.symbol_map.candidates(symbol);
        let mut fetched = Vec::new();
        for (source, upstream_ticker) in candidates {
            let got = retry_fetch(symbol, source, || (self.fetch_one)(source.clone(), upstream_ticker.clone())).await;
            if !got.is_empty() {
                fetched = got;
                break;
            }
            tracing::info!(symbol, source, "index source returned no data, trying next");
        }
        fetched.into_iter().filter(|row| row.date >= start && row.date <= end).collect()
    }
}

#[async_trait]
impl<F, Fut> PriceDataProvider for IndexProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<RawQuoteRow>, String>> + Send,
{
    async fn load(&self, symbols: &[String], start: NaiveDate, end: NaiveDate, _fields: Option<&[String]>) -> Result<Panel, Error> {
        let mut rows: Vec<(NaiveDate, String, RawQuoteRow)> = Vec::new();

        for symbol in symbols {
            for row in self.fetch_rows(symbol, start, end).await {
                rows.push((row.date, symbol.clone(), row));
            }
        }

        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.0).collect();
        let mut panel = Panel::empty(dates, symbols.to_vec());
        for (date, symbol, row) in &rows {
            panel.set(*date, symbol, "open", row.open);
            panel.set(*date, symbol, "high", row.high);
            panel.set(*date, symbol, "low", row.low);
            panel.set(*date, symbol, "close", row.close);
            if let Some(v) = row.adj_close {
                panel.set(*date, symbol, "adj_close", v);
            }
        }
        Ok(panel)
    }
}
