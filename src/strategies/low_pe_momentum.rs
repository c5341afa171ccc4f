//! Low-PE universe filtered with simple trailing-momentum ranking.
//! Grounded in `core/strategy/fundamental/low_pe_momentum.py`.

use crate::backtest::portfolio::PortfolioSnapshot;
use crate::backtest::strategy::{Strategy, StrategyContext};
use crate::error::StrategyError;
use crate::panel::Snapshot;
use chrono::NaiveDate;
use std::collections::BTreeMap;

const EPS_ATTRIBUTE: &str = "inc_eps_basic";

pub struct LowPeMomentumStrategy {
    pub max_assets: usize,
    pub max_pe: Option<f64>,
    pub min_eps: f64,
    pub momentum_window: usize,
    pub min_momentum: f64,
    pub price_field: Option<String>,
    pub universe_overrides: Option<Vec<String>>,

    pub eligible_symbols: Vec<String>,
    pub resolved_price_field: Option<String>,
}

impl Default for LowPeMomentumStrategy {
    fn default() -> Self {
        Self {
            max_assets: 20,
            max_pe: Some(40.0),
            min_eps: 0.05,
            momentum_window: 60,
            min_momentum: 0.0,
            price_field: None,
            universe_overrides: None,
            eligible_symbols: Vec::new(),
            resolved_price_field: None,
        }
    }
}

impl LowPeMomentumStrategy {
    fn first_valid_price(context: &StrategyContext, symbol: &str, price_field: &str) -> Option<f64> {
        context.price_series(symbol, price_field).ok()?.first().map(|(_, v)| *v)
    }

    fn candidate_universe<'a>(&'a self, context: &'a StrategyContext) -> Vec<String> {
        match &self.universe_overrides {
            Some(overrides) if !overrides.is_empty() => {
                let mut seen = std::collections::BTreeSet::new();
                overrides.iter().filter(|s| seen.insert((*s).clone())).cloned().collect()
            }
            _ => context.universe.to_vec(),
        }
    }
}

impl Strategy for LowPeMomentumStrategy {
    fn initialize(&mut self, context: &StrategyContext) {
        if self.momentum_window == 0 {
            self.eligible_symbols.clear();
            return;
        }

        let price_field = self.price_field.clone().unwrap_or_else(|| context.config.price_field.clone());
        let price_field = if context.price_history.has_field(&price_field) {
            price_field
        } else {
            context.config.fallback_price_field.clone()
        };
        self.resolved_price_field = Some(price_field.clone());

        let candidates = self.candidate_universe(context);
        let mut eligible = Vec::new();
        for symbol in candidates {
            let Some(eps) = context.fundamental(&symbol, EPS_ATTRIBUTE) else { continue };
            if eps <= self.min_eps {
                continue;
            }
            let Some(price) = Self::first_valid_price(context, &symbol, &price_field) else { continue };
            if price <= 0.0 {
                continue;
            }
            let pe = price / eps;
            if let Some(max_pe) = self.max_pe {
                if pe > max_pe {
                    continue;
                }
            }
            eligible.push(symbol);
        }
        eligible.sort();
        eligible.dedup();
        self.eligible_symbols = eligible;
    }

    fn on_rebalance(&mut self, as_of: NaiveDate, context: &StrategyContext, price_snapshot: &Snapshot, _portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        let Some(price_field) = &self.resolved_price_field else { return BTreeMap::new() };
        if self.eligible_symbols.is_empty() {
            return BTreeMap::new();
        }

        let mut scores: Vec<(String, f64)> = Vec::new();
        for symbol in &self.eligible_symbols {
            if !price_snapshot.contains_symbol(symbol) {
                continue;
            }
            let Ok(series) = context.price_series(symbol, price_field) else { continue };
            let window: Vec<f64> = series.iter().filter(|(d, _)| *d <= as_of).map(|(_, v)| *v).collect();
            if window.len() < self.momentum_window + 1 {
                continue;
            }
            let tail = &window[window.len() - (self.momentum_window + 1)..];
            let first = tail[0];
            let last = *tail.last().unwrap();
            if first == 0.0 {
                continue;
            }
            let momentum = last / first - 1.0;
            if momentum < self.min_momentum {
                continue;
            }
            scores.push((symbol.clone(), momentum));
        }

        if scores.is_empty() {
            return BTreeMap::new();
        }
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let limit = self.max_assets.min(context.config.max_positions);
        let selected: Vec<String> = scores.into_iter().take(limit).map(|(s, _)| s).collect();
        if selected.is_empty() {
            return BTreeMap::new();
        }

        let weight = 1.0 / selected.len() as f64;
        selected.into_iter().map(|s| (s, weight)).collect()
    }
}

/// Surfaced separately so callers can map it to a [`StrategyError`] the
/// way the engine expects (the trait's `initialize` has no `Result` return
/// per spec §4.12's illustrative contract, but misconfiguration is still a
/// caller-visible condition worth naming).
pub fn validate_config(momentum_window: usize) -> Result<(), StrategyError> {
    if momentum_window == 0 {
        return Err(StrategyError::Other("momentum_window must be a positive integer".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::BacktestConfig;
    use crate::panel::Panel;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn build_panel() -> Panel {
        let mut rows = Vec::new();
        for i in 0..5 {
            let date = d(2025, 1, 1) + chrono::Duration::days(i);
            rows.push((date, "AAA".to_string(), "close", 100.0 + i as f64 * 2.0));
            rows.push((date, "BBB".to_string(), "close", 100.0));
        }
        Panel::from_rows(&rows)
    }

    fn fundamentals() -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut f = BTreeMap::new();
        let mut aaa = BTreeMap::new();
        aaa.insert(EPS_ATTRIBUTE.to_string(), 5.0);
        f.insert("AAA".to_string(), aaa);
        let mut bbb = BTreeMap::new();
        bbb.insert(EPS_ATTRIBUTE.to_string(), 0.01);
        f.insert("BBB".to_string(), bbb);
        f
    }

    #[test]
    fn low_eps_symbols_are_excluded_from_eligibility() {
        let panel = build_panel();
        let fundamentals = fundamentals();
        let universe = vec!["AAA".to_string(), "BBB".to_string()];
        let config = BacktestConfig { price_field: "close".into(), max_positions: 10, ..Default::default() };
        let context = StrategyContext { price_history: &panel, fundamentals: &fundamentals, config: &config, universe: &universe, current_date: None };
        let mut strategy = LowPeMomentumStrategy { momentum_window: 3, ..Default::default() };
        strategy.initialize(&context);
        assert_eq!(strategy.eligible_symbols, vec!["AAA".to_string()]);
    }

    #[test]
    fn rebalance_selects_eligible_symbols_with_positive_momentum() {
        let panel = build_panel();
        let fundamentals = fundamentals();
        let universe = vec!["AAA".to_string(), "BBB".to_string()];
        let config = BacktestConfig { price_field: "close".into(), max_positions: 10, ..Default::default() };
        let context = StrategyContext { price_history: &panel, fundamentals: &fundamentals, config: &config, universe: &universe, current_date: None };
        let mut strategy = LowPeMomentumStrategy { momentum_window: 3, ..Default::default() };
        strategy.initialize(&context);

        let as_of = d(2025, 1, 5);
        let snapshot = panel.snapshot(as_of);
        let portfolio_snapshot = PortfolioSnapshot { date: as_of, cash: 0.0, equity: 0.0, positions: Vec::new() };
        let weights = strategy.on_rebalance(as_of, &context, &snapshot, &portfolio_snapshot);
        assert_eq!(weights.get("AAA"), Some(&1.0));
    }
}
