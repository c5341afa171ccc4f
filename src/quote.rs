//! Quote service: upsert daily OHLCV time-series; latest date per symbol;
//! paged panel reads (spec §4.5).

use crate::error::{InvalidInputError, RepositoryError};
use crate::key_codec;
use crate::panel::Panel;
use crate::repository::{AttrValue, IndexName, Item, Repository, ScanDirection};
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// A single daily OHLCV row, immutable once final (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Option<Decimal>,
    pub volume: Option<i64>,
    pub turnover_amount: Option<Decimal>,
    pub turnover_rate: Option<Decimal>,
    pub vwap: Option<Decimal>,
    pub adj_factor: Option<Decimal>,
    pub currency: Option<String>,
    pub source: Option<String>,
}

impl Quote {
    fn required_fields_present(&self) -> bool {
        !self.symbol.trim().is_empty()
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttrValue::S(key_codec::pk_stock(&self.symbol)));
        item.insert("sk".into(), AttrValue::S(key_codec::sk_quote_date(self.date)));
        item.insert("gsi1pk".into(), AttrValue::S(key_codec::gsi1pk_symbol(&self.symbol)));
        let iso = self.date.format("%Y-%m-%d").to_string();
        item.insert("gsi1sk".into(), AttrValue::S(key_codec::gsi1sk_entity("QUOTE", Some(&iso))));
        item.insert("symbol".into(), AttrValue::S(self.symbol.clone()));
        item.insert("date".into(), AttrValue::S(iso));
        item.insert("open".into(), AttrValue::N(self.open));
        item.insert("high".into(), AttrValue::N(self.high));
        item.insert("low".into(), AttrValue::N(self.low));
        item.insert("close".into(), AttrValue::N(self.close));
        if let Some(v) = self.adj_close {
            item.insert("adj_close".into(), AttrValue::N(v));
        }
        if let Some(v) = self.volume {
            item.insert("volume".into(), AttrValue::I(v));
        }
        if let Some(v) = self.turnover_amount {
            item.insert("turnover_amount".into(), AttrValue::N(v));
        }
        if let Some(v) = self.turnover_rate {
            item.insert("turnover_rate".into(), AttrValue::N(v));
        }
        if let Some(v) = self.vwap {
            item.insert("vwap".into(), AttrValue::N(v));
        }
        if let Some(v) = self.adj_factor {
            item.insert("adj_factor".into(), AttrValue::N(v));
        }
        if let Some(ref v) = self.currency {
            item.insert("currency".into(), AttrValue::S(v.clone()));
        }
        if let Some(ref v) = self.source {
            item.insert("source".into(), AttrValue::S(v.clone()));
        }
        item.insert("ingested_at".into(), AttrValue::S(Utc::now().to_rfc3339()));
        item
    }

    fn from_item(item: &Item) -> Option<Self> {
        let date = NaiveDate::parse_from_str(item.get("date")?.as_str()?, "%Y-%m-%d").ok()?;
        Some(Self {
            symbol: item.get("symbol")?.as_str()?.to_string(),
            date,
            open: item.get("open")?.as_decimal()?,
            high: item.get("high")?.as_decimal()?,
            low: item.get("low")?.as_decimal()?,
            close: item.get("close")?.as_decimal()?,
            adj_close: item.get("adj_close").and_then(AttrValue::as_decimal),
            volume: item.get("volume").and_then(AttrValue::as_i64),
            turnover_amount: item.get("turnover_amount").and_then(AttrValue::as_decimal),
            turnover_rate: item.get("turnover_rate").and_then(AttrValue::as_decimal),
            vwap: item.get("vwap").and_then(AttrValue::as_decimal),
            adj_factor: item.get("adj_factor").and_then(AttrValue::as_decimal),
            currency: item.get("currency").and_then(AttrValue::as_str).map(String::from),
            source: item.get("source").and_then(AttrValue::as_str).map(String::from),
        })
    }
}

pub struct QuoteService {
    repo: Arc<dyn Repository>,
}

impl QuoteService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Required columns {symbol, date, open, high, low, close}; optional
    /// others persisted only when present and finite. Idempotent: a row
    /// with date D exists at most once per symbol (spec §3, §4.5).
    pub async fn upsert_quotes(&self, rows: &[Quote]) -> Result<usize, crate::error::Error> {
        for row in rows {
            if !row.required_fields_present() {
                return Err(InvalidInputError::MissingColumns(vec!["symbol", "date", "open", "high", "low", "close"]).into());
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let items: Vec<Item> = rows.iter().map(Quote::to_item).collect();
        self.repo.batch_put(items).await.map_err(RepositoryError::from)?;
        Ok(rows.len())
    }

    /// Queries `bySymbol` with prefix `ENTITY#QUOTE`, descending, limit 1.
    pub async fn latest_quote_date(&self, symbol: &str) -> Result<Option<NaiveDate>, crate::error::Error> {
        let pk = key_codec::gsi1pk_symbol(symbol);
        let page = self
            .repo
            .query_by_index(IndexName::BySymbol, &pk, Some("ENTITY#QUOTE"), Some(1), ScanDirection::Backward)
            .await
            .map_err(RepositoryError::from)?;
        Ok(page.items.first().and_then(Quote::from_item).map(|q| q.date))
    }

    /// Rows sorted by date ascending, strictly within `[start, end]`.
    pub async fn get_quotes(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Quote>, crate::error::Error> {
        let pk = key_codec::gsi1pk_symbol(symbol);
        let page = self
            .repo
            .query_by_index(IndexName::BySymbol, &pk, Some("ENTITY#QUOTE"), None, ScanDirection::Forward)
            .await
            .map_err(RepositoryError::from)?;
        let mut quotes: Vec<Quote> = page
            .items
            .iter()
            .filter_map(Quote::from_item)
            .filter(|q| start.is_none_or(|s| q.date >= s) && end.is_none_or(|e| q.date <= e))
            .collect();
        quotes.sort_by_key(|q| q.date);
        Ok(quotes)
    }

    /// Two-level `(date, symbol)` panel over the requested symbols/window.
    pub async fn get_price_panel(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Panel, crate::error::Error> {
        let mut rows: Vec<(NaiveDate, String, Quote)> = Vec::new();
        for symbol in symbols {
            let quotes = self.get_quotes(symbol, start, end).await?;
            for q in quotes {
                rows.push((q.date, symbol.clone(), q));
            }
        }
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.0).collect();
        let mut panel = Panel::empty(dates, symbols.to_vec());
        for (date, symbol, q) in &rows {
            panel.set(*date, symbol, "open", q.open.to_f64().unwrap_or(0.0));
            panel.set(*date, symbol, "high", q.high.to_f64().unwrap_or(0.0));
            panel.set(*date, symbol, "low", q.low.to_f64().unwrap_or(0.0));
            panel.set(*date, symbol, "close", q.close.to_f64().unwrap_or(0.0));
            if let Some(v) = q.adj_close {
                panel.set(*date, symbol, "adj_close", v.to_f64().unwrap_or(0.0));
            }
            if let Some(v) = q.volume {
                panel.set(*date, symbol, "volume", v as f64);
            }
        }
        Ok(panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryRepository;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, date: NaiveDate, close: Decimal) -> Quote {
        Quote {
            symbol: symbol.into(),
            date,
            open: close,
            high: close,
            low: close,
            close,
            adj_close: None,
            volume: Some(1000),
            turnover_amount: None,
            turnover_rate: None,
            vwap: None,
            adj_factor: None,
            currency: None,
            source: None,
        }
    }

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn reingesting_same_date_overwrites_single_row() {
        let repo = Arc::new(InMemoryRepository::new());
        let svc = QuoteService::new(repo);
        svc.upsert_quotes(&[quote("AAA", d(2025, 1, 2), dec!(10))]).await.unwrap();
        svc.upsert_quotes(&[quote("AAA", d(2025, 1, 2), dec!(11))]).await.unwrap();
        let rows = svc.get_quotes("AAA", None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, dec!(11));
    }

    #[tokio::test]
    async fn get_quotes_sorted_ascending_and_windowed() {
        let repo = Arc::new(InMemoryRepository::new());
        let svc = QuoteService::new(repo);
        svc.upsert_quotes(&[
            quote("AAA", d(2025, 1, 3), dec!(3)),
            quote("AAA", d(2025, 1, 1), dec!(1)),
            quote("AAA", d(2025, 1, 2), dec!(2)),
        ])
        .await
        .unwrap();
        let rows = svc.get_quotes("AAA", Some(d(2025, 1, 2)), Some(d(2025, 1, 3))).await.unwrap();
        assert_eq!(rows.iter().map(|q| q.date).collect::<Vec<_>>(), vec![d(2025, 1, 2), d(2025, 1, 3)]);
    }

    #[tokio::test]
    async fn latest_quote_date_returns_most_recent() {
        let repo = Arc::new(InMemoryRepository::new());
        let svc = QuoteService::new(repo);
        svc.upsert_quotes(&[quote("AAA", d(2025, 1, 1), dec!(1)), quote("AAA", d(2025, 1, 5), dec!(5))]).await.unwrap();
        assert_eq!(svc.latest_quote_date("AAA").await.unwrap(), Some(d(2025, 1, 5)));
        assert_eq!(svc.latest_quote_date("NOPE").await.unwrap(), None);
    }
}
