//! End-to-end backtest scenarios (spec §8), exercising the engine,
//! portfolio, and providers together rather than any one module in
//! isolation.

use async_trait::async_trait;
use chrono::NaiveDate;
use quant_core::backtest::config::BacktestConfig;
use quant_core::backtest::engine::BacktestEngine;
use quant_core::backtest::portfolio::PortfolioSnapshot;
use quant_core::backtest::strategy::{Strategy, StrategyContext};
use quant_core::error::Error;
use quant_core::panel::{Panel, Snapshot};
use quant_core::providers::PriceDataProvider;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn weekday_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        if !matches!(cur.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            out.push(cur);
        }
        cur += chrono::Duration::days(1);
    }
    out
}

struct FixedPanelProvider(Panel);

#[async_trait]
impl PriceDataProvider for FixedPanelProvider {
    async fn load(&self, _symbols: &[String], start: NaiveDate, end: NaiveDate, _fields: Option<&[String]>) -> Result<Panel, Error> {
        Ok(self.0.slice_range(start, end))
    }
}

/// Buys 100% of a single symbol on the first rebalance and never trades again.
struct BuyAndHold {
    symbol: String,
    bought: bool,
}

impl Strategy for BuyAndHold {
    fn initialize(&mut self, _context: &StrategyContext) {
        self.bought = false;
    }

    fn on_rebalance(&mut self, _as_of: NaiveDate, _context: &StrategyContext, _price_snapshot: &Snapshot, _portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        if self.bought {
            return BTreeMap::new();
        }
        self.bought = true;
        let mut weights = BTreeMap::new();
        weights.insert(self.symbol.clone(), 1.0);
        weights
    }
}

#[tokio::test]
async fn buy_and_hold_total_return_matches_the_underlying_price_move() {
    let dates = weekday_range(d(2025, 1, 1), d(2025, 3, 31));
    let mut rows = Vec::new();
    let start_price = 100.0;
    let end_price = 150.0;
    let n = dates.len() as f64 - 1.0;
    for (i, &date) in dates.iter().enumerate() {
        let price = start_price + (end_price - start_price) * (i as f64 / n);
        rows.push((date, "AAA".to_string(), "close", price));
    }
    let panel = Panel::from_rows(&rows);

    let config = BacktestConfig {
        start_date: dates[0],
        end_date: *dates.last().unwrap(),
        initial_capital: 10_000.0,
        rebalance_frequency: "daily".into(),
        price_field: "close".into(),
        fallback_price_field: "close".into(),
        max_positions: 5,
        ..Default::default()
    };
    let engine = BacktestEngine::new(config, Arc::new(FixedPanelProvider(panel)), None, None).unwrap();
    let mut strategy = BuyAndHold { symbol: "AAA".into(), bought: false };
    let universe = vec!["AAA".to_string()];
    let result = engine.run(&mut strategy, Some(&universe)).await.unwrap();

    let expected_return = end_price / start_price - 1.0;
    assert!((result.total_return - expected_return).abs() < 0.01, "total_return={} expected={}", result.total_return, expected_return);
}

/// A strategy that always proposes equal weight across every symbol in the
/// universe, regardless of how many that is.
struct EquallyWeightEverything;

impl Strategy for EquallyWeightEverything {
    fn initialize(&mut self, _context: &StrategyContext) {}

    fn on_rebalance(&mut self, _as_of: NaiveDate, context: &StrategyContext, price_snapshot: &Snapshot, _portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        let symbols: Vec<&String> = context.universe.iter().filter(|s| price_snapshot.contains_symbol(s)).collect();
        if symbols.is_empty() {
            return BTreeMap::new();
        }
        let weight = 1.0 / symbols.len() as f64;
        symbols.into_iter().map(|s| (s.clone(), weight)).collect()
    }
}

#[tokio::test]
async fn max_positions_cap_is_enforced_even_when_more_symbols_are_proposed() {
    let dates = weekday_range(d(2025, 1, 1), d(2025, 1, 31));
    let symbols: Vec<String> = (0..10).map(|i| format!("SYM{i}")).collect();
    let mut rows = Vec::new();
    for &date in &dates {
        for (i, symbol) in symbols.iter().enumerate() {
            rows.push((date, symbol.clone(), "close", 10.0 + i as f64));
        }
    }
    let panel = Panel::from_rows(&rows);

    let config = BacktestConfig {
        start_date: dates[0],
        end_date: *dates.last().unwrap(),
        initial_capital: 100_000.0,
        rebalance_frequency: "weekly".into(),
        price_field: "close".into(),
        fallback_price_field: "close".into(),
        max_positions: 3,
        ..Default::default()
    };
    let engine = BacktestEngine::new(config, Arc::new(FixedPanelProvider(panel)), None, None).unwrap();
    let mut strategy = EquallyWeightEverything;
    let result = engine.run(&mut strategy, Some(&symbols)).await.unwrap();

    assert!(result.ending_positions.len() <= 3, "held {} positions, expected at most 3", result.ending_positions.len());
}

/// Captures the universe a strategy actually saw, for dedup/normalization
/// assertions.
struct RecordingStrategy {
    seen_universe: Arc<Mutex<Vec<String>>>,
}

impl Strategy for RecordingStrategy {
    fn initialize(&mut self, context: &StrategyContext) {
        *self.seen_universe.lock() = context.universe.to_vec();
    }

    fn on_rebalance(&mut self, _as_of: NaiveDate, _context: &StrategyContext, _price_snapshot: &Snapshot, _portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

#[tokio::test]
async fn universe_input_is_normalized_to_uppercase_and_deduplicated() {
    let dates = weekday_range(d(2025, 1, 1), d(2025, 1, 10));
    let mut rows = Vec::new();
    for &date in &dates {
        rows.push((date, "AAA".to_string(), "close", 10.0));
    }
    let panel = Panel::from_rows(&rows);
    let config = BacktestConfig { start_date: dates[0], end_date: *dates.last().unwrap(), price_field: "close".into(), fallback_price_field: "close".into(), ..Default::default() };
    let engine = BacktestEngine::new(config, Arc::new(FixedPanelProvider(panel)), None, None).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut strategy = RecordingStrategy { seen_universe: seen.clone() };
    let messy_universe = vec!["aaa".to_string(), "AAA".to_string(), " aaa ".to_string()];
    engine.run(&mut strategy, Some(&messy_universe)).await.unwrap();

    assert_eq!(*seen.lock(), vec!["AAA".to_string()]);
}

#[tokio::test]
async fn insufficient_cash_scales_down_buys_without_going_negative() {
    let dates = weekday_range(d(2025, 1, 1), d(2025, 1, 15));
    let mut rows = Vec::new();
    for &date in &dates {
        rows.push((date, "AAA".to_string(), "close", 500.0));
        rows.push((date, "BBB".to_string(), "close", 500.0));
    }
    let panel = Panel::from_rows(&rows);

    let config = BacktestConfig {
        start_date: dates[0],
        end_date: *dates.last().unwrap(),
        initial_capital: 100.0,
        rebalance_frequency: "daily".into(),
        price_field: "close".into(),
        fallback_price_field: "close".into(),
        max_positions: 5,
        ..Default::default()
    };
    let engine = BacktestEngine::new(config, Arc::new(FixedPanelProvider(panel)), None, None).unwrap();
    let mut strategy = EquallyWeightEverything;
    let universe = vec!["AAA".to_string(), "BBB".to_string()];
    let result = engine.run(&mut strategy, Some(&universe)).await.unwrap();

    assert!(result.ending_cash >= -1e-6, "ending cash went negative: {}", result.ending_cash);
}
