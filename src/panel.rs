//! A two-level `(date, symbol)` indexed table with named columns (spec §9
//! "Design Notes": frames are an implementation convenience; the abstract
//! contract is an ordered row collection keyed by `(date, symbol)` with
//! slice-by-range and projection-by-column). Implemented here as a
//! column-store of typed slices over a sorted date index and an interned
//! symbol table, per the spec's own suggested systems-level substitute
//! for a dataframe library.

use chrono::NaiveDate;
use std::collections::BTreeMap;

/// A single `(date, symbol)`-indexed table of `f64` columns.
#[derive(Debug, Clone, Default)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    symbol_index: BTreeMap<String, usize>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

/// A single-level `date`-free view indexed only by symbol (the output of
/// `Panel::snapshot`, consumed as a `price_snapshot` by strategies).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Snapshot {
    pub fn get(&self, symbol: &str, field: &str) -> Option<f64> {
        self.rows.get(symbol).and_then(|row| row.get(field)).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.rows.contains_key(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Panel {
    /// Build a panel from `(date, symbol, field, value)` rows. Dates and
    /// symbols are sorted and de-duplicated; missing (date, symbol, field)
    /// combinations are `None`, never coerced to zero (spec §3 invariant).
    pub fn from_rows(rows: &[(NaiveDate, String, &str, f64)]) -> Self {
        let mut dates: Vec<NaiveDate> = rows.iter().map(|r| r.0).collect();
        dates.sort();
        dates.dedup();

        let mut symbols: Vec<String> = rows.iter().map(|r| r.1.clone()).collect();
        symbols.sort();
        symbols.dedup();

        let mut panel = Panel::empty(dates, symbols);
        for (date, symbol, field, value) in rows {
            panel.set(*date, symbol, field, *value);
        }
        panel
    }

    pub fn empty(mut dates: Vec<NaiveDate>, mut symbols: Vec<String>) -> Self {
        dates.sort();
        dates.dedup();
        symbols.sort();
        symbols.dedup();
        let symbol_index = symbols.iter().enumerate().map(|(i, s)| (s.clone(), i)).collect();
        Self { dates, symbols, symbol_index, columns: BTreeMap::new() }
    }

    fn slot(&self, date_idx: usize, symbol_idx: usize) -> usize {
        date_idx * self.symbols.len() + symbol_idx
    }

    pub fn set(&mut self, date: NaiveDate, symbol: &str, field: &str, value: f64) {
        let date_idx = match self.dates.binary_search(&date) {
            Ok(i) => i,
            Err(_) => return,
        };
        let Some(&symbol_idx) = self.symbol_index.get(symbol) else { return };
        let slot = self.slot(date_idx, symbol_idx);
        let column = self
            .columns
            .entry(field.to_string())
            .or_insert_with(|| vec![None; self.dates.len() * self.symbols.len()]);
        column[slot] = Some(value);
    }

    pub fn get(&self, date: NaiveDate, symbol: &str, field: &str) -> Option<f64> {
        let date_idx = self.dates.binary_search(&date).ok()?;
        let symbol_idx = *self.symbol_index.get(symbol)?;
        self.columns.get(field)?[self.slot(date_idx, symbol_idx)]
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.symbols.is_empty() || self.columns.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Restrict the panel to `[start, end]` inclusive, returning a new panel.
    pub fn slice_range(&self, start: NaiveDate, end: NaiveDate) -> Panel {
        let kept_dates: Vec<NaiveDate> = self.dates.iter().copied().filter(|d| *d >= start && *d <= end).collect();
        let mut out = Panel::empty(kept_dates.clone(), self.symbols.clone());
        for field in self.columns.keys() {
            for &date in &kept_dates {
                for symbol in &self.symbols {
                    if let Some(v) = self.get(date, symbol, field) {
                        out.set(date, symbol, field, v);
                    }
                }
            }
        }
        out
    }

    /// A single-date cross-section indexed by symbol.
    pub fn snapshot(&self, date: NaiveDate) -> Snapshot {
        let mut rows: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let Ok(date_idx) = self.dates.binary_search(&date) else { return Snapshot::default() };
        for symbol in &self.symbols {
            let symbol_idx = self.symbol_index[symbol];
            let mut row = BTreeMap::new();
            for (field, column) in &self.columns {
                if let Some(v) = column[self.slot(date_idx, symbol_idx)] {
                    row.insert(field.clone(), v);
                }
            }
            if !row.is_empty() {
                rows.insert(symbol.clone(), row);
            }
        }
        Snapshot { rows }
    }

    /// A chronological `(date, value)` time series of `field` for one symbol,
    /// skipping missing values.
    pub fn series(&self, symbol: &str, field: &str) -> Vec<(NaiveDate, f64)> {
        let Some(&symbol_idx) = self.symbol_index.get(symbol) else { return Vec::new() };
        let Some(column) = self.columns.get(field) else { return Vec::new() };
        self.dates
            .iter()
            .enumerate()
            .filter_map(|(date_idx, &date)| column[self.slot(date_idx, symbol_idx)].map(|v| (date, v)))
            .collect()
    }
}
