//! Single-exchange equity adapter: unit normalization grounded in
//! `core/data_collector/stock/daily_quotes.py` (lots -> shares, percentage
//! turnover rate detection, adjustment factor and VWAP derivation).

use super::{fetch_with_fallback, retry_fetch, PriceDataProvider, RawQuoteProvider, RawQuoteRow};
use crate::error::Error;
use crate::panel::Panel;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Raw upstream row before unit normalization. `volume_lots` is in the
/// source exchange's native lot size; `turnover_rate_pct` may carry a
/// trailing `%` the caller has already stripped, leaving the ambiguity
/// between a 0-1 fraction and a 0-100 percentage for `normalize_row` to
/// resolve from `looked_like_percentage`.
#[derive(Debug, Clone)]
pub struct UpstreamRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume_lots: Option<f64>,
    pub turnover_amount: Option<f64>,
    pub turnover_rate_pct: Option<f64>,
    pub looked_like_percentage: bool,
    pub currency: Option<String>,
}

const SHARES_PER_LOT: f64 = 100.0;

/// Normalizes one upstream row into a `RawQuoteRow`:
/// - `volume`: lots -> shares (`x * 100`).
/// - `turnover_rate`: divided by 100 when the source formatted it as a
///   percentage (trailing `%` detected upstream), else left as-is.
/// - `adj_factor = adj_close / close`, missing when `close` is zero.
/// - `vwap = turnover_amount / volume`, missing when `volume` is zero,
///   non-finite, or negative.
pub fn normalize_row(row: &UpstreamRow, source: &str) -> RawQuoteRow {
    let volume = row.volume_lots.map(|lots| lots * SHARES_PER_LOT);
    let turnover_rate = row.turnover_rate_pct.map(|r| if row.looked_like_percentage { r / 100.0 } else { r });

    RawQuoteRow {
        date: row.date,
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        adj_close: row.adj_close,
        volume,
        turnover_amount: row.turnover_amount,
        turnover_rate,
        adj_factor: None,
        vwap: None,
        currency: row.currency.clone(),
        source: source.to_string(),
    }
}

/// Derives `adj_factor` and `vwap` for a normalized row in place, mirroring
/// the upstream script's post-processing step.
pub fn derive_fields(row: &RawQuoteRow) -> (Option<f64>, Option<f64>) {
    let adj_factor = row
        .adj_close
        .filter(|_| row.close != 0.0)
        .map(|adj| adj / row.close)
        .filter(|v| v.is_finite());

    let vwap = match (row.turnover_amount, row.volume) {
        (Some(amount), Some(volume)) if volume > 0.0 => {
            let v = amount / volume;
            v.is_finite().then_some(v)
        }
        _ => None,
    };

    (adj_factor, vwap)
}

/// A [`PriceDataProvider`] backed by one or more upstream equity sources,
/// tried in order with retry + fallback (spec §4.3).
pub struct EquityProvider<F> {
    pub sources: Vec<String>,
    fetch_one: F,
}

impl<F, Fut> EquityProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<UpstreamRow>, String>> + Send,
{
    pub fn new(sources: Vec<String>, fetch_one: F) -> Self {
        Self { sources, fetch_one }
    }
}

#[async_trait]
impl<F, Fut> RawQuoteProvider for EquityProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<UpstreamRow>, String>> + Send,
{
    /// Tries each configured source in order (spec §4.3 fallback chain),
    /// normalizing units and deriving `adj_factor`/`vwap` on the winning
    /// source's rows, restricted to `[start, end]`.
    async fn fetch_rows(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<RawQuoteRow> {
        let sources = self.sources.clone();
        let normalized = fetch_with_fallback(symbol, &sources, |source| async move {
            let raw = retry_fetch(symbol, &source, || (self.fetch_one)(symbol.to_string(), source.clone())).await;
            raw.into_iter().map(|r| normalize_row(&r, &source)).collect()
        })
        .await;

        normalized
            .into_iter()
            .filter(|row| row.date >= start && row.date <= end)
            .map(|mut row| {
                let (adj_factor, vwap) = derive_fields(&row);
                row.adj_close = row.adj_close.or(Some(row.close));
                row.adj_factor = adj_factor;
                row.vwap = vwap;
                row
            })
            .collect()
    }
}

#[async_trait]
impl<F, Fut> PriceDataProvider for EquityProvider<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<UpstreamRow>, String>> + Send,
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
            if let Some(v) = row.volume {
                panel.set(*date, symbol, "volume", v);
            }
            if let Some(v) = row.turnover_amount {
                panel.set(*date, symbol, "turnover_amount", v);
            }
            if let Some(v) = row.turnover_rate {
                panel.set(*date, symbol, "turnover_rate", v);
            }
            if let Some(v) = row.adj_factor {
                panel.set(*date, symbol, "adj_factor", v);
            }
            if let Some(v) = row.vwap {
                panel.set(*date, symbol, "vwap", v);
            }
        }
        Ok(panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base_row() -> UpstreamRow {
        UpstreamRow {
            date: d(2025, 1, 2),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            adj_close: Some(10.0),
            volume_lots: Some(5.0),
            turnover_amount: Some(5250.0),
            turnover_rate_pct: Some(1.25),
            looked_like_percentage: true,
            currency: Some("CNY".into()),
        }
    }

    #[test]
    fn lots_are_converted_to_shares() {
        let normalized = normalize_row(&base_row(), "akshare");
        assert_eq!(normalized.volume, Some(500.0));
    }

    #[test]
    fn percentage_turnover_rate_is_divided_by_one_hundred() {
        let normalized = normalize_row(&base_row(), "akshare");
        assert_eq!(normalized.turnover_rate, Some(0.0125));
    }

    #[test]
    fn non_percentage_turnover_rate_is_passed_through() {
        let mut raw = base_row();
        raw.looked_like_percentage = false;
        raw.turnover_rate_pct = Some(0.0125);
        let normalized = normalize_row(&raw, "akshare");
        assert_eq!(normalized.turnover_rate, Some(0.0125));
    }

    #[test]
    fn adj_factor_and_vwap_are_derived() {
        let normalized = normalize_row(&base_row(), "akshare");
        let (adj_factor, vwap) = derive_fields(&normalized);
        assert_eq!(adj_factor, Some(10.0 / 10.5));
        assert_eq!(vwap, Some(5250.0 / 500.0));
    }

    #[test]
    fn zero_volume_yields_missing_vwap_not_a_division_error() {
        let mut raw = base_row();
        raw.volume_lots = Some(0.0);
        let normalized = normalize_row(&raw, "akshare");
        let (_, vwap) = derive_fields(&normalized);
        assert_eq!(vwap, None);
    }

    #[tokio::test]
    async fn fetch_rows_carries_derived_adj_factor_and_vwap() {
        let raw = base_row();
        let provider = EquityProvider::new(vec!["akshare".to_string()], move |_symbol, _source| {
            let raw = raw.clone();
            async move { Ok(vec![raw]) }
        });
        let rows = provider.fetch_rows("AAA", d(2025, 1, 1), d(2025, 1, 31)).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].adj_factor, Some(10.0 / 10.5));
        assert_eq!(rows[0].vwap, Some(5250.0 / 500.0));
    }
}
