//! Strategy contract and shared read-only context (spec §4.10, §4.12).
//! Grounded in `core/backtest/strategy.py`'s `Strategy` protocol and
//! `StrategyContext`.

use super::config::BacktestConfig;
use super::portfolio::PortfolioSnapshot;
use crate::error::StrategyError;
use crate::panel::{Panel, Snapshot};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Read-only view of data and configuration handed to a strategy. Built
/// once per run by [`super::engine::BacktestEngine`].
pub struct StrategyContext<'a> {
    pub price_history: &'a Panel,
    pub fundamentals: &'a BTreeMap<String, BTreeMap<String, f64>>,
    pub config: &'a BacktestConfig,
    pub universe: &'a [String],
    pub current_date: Option<NaiveDate>,
}

impl<'a> StrategyContext<'a> {
    /// A chronological `(date, value)` series of `field` for one symbol.
    pub fn price_series(&self, symbol: &str, field: &str) -> Result<Vec<(NaiveDate, f64)>, StrategyError> {
        if !self.price_history.has_field(field) {
            return Err(StrategyError::Other(format!("field '{field}' not present in price history")));
        }
        Ok(self.price_history.series(symbol, field))
    }

    pub fn fundamental(&self, symbol: &str, attribute: &str) -> Option<f64> {
        self.fundamentals.get(symbol)?.get(attribute).copied()
    }
}

/// Implemented by every backtest strategy (spec §4.12).
pub trait Strategy {
    fn initialize(&mut self, context: &StrategyContext);

    /// Returns target portfolio weights keyed by symbol. Weights outside
    /// `[0, 1]` or for symbols missing a resolvable price are trimmed or
    /// ignored by [`super::portfolio::Portfolio::rebalance`].
    fn on_rebalance(&mut self, as_of: NaiveDate, context: &StrategyContext, price_snapshot: &Snapshot, portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64>;
}
