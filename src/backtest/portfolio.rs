//! Portfolio execution: mark-to-market, sells-before-buys rebalancing with
//! slippage/fee factors and cash-scaled buy overrun protection (spec
//! §4.11). Grounded line-for-line in `core/backtest/engine.py`'s
//! `Portfolio` class.

use super::config::BacktestConfig;
use crate::panel::Snapshot;
use chrono::NaiveDate;
use std::collections::BTreeMap;

const EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
struct Position {
    quantity: f64,
    avg_price: f64,
    entry_date: NaiveDate,
}

/// Immutable snapshot of one open position exposed to strategies/results.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionView {
    pub symbol: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub market_price: f64,
    pub market_value: f64,
}

/// A closed (sold) trade summary used for win-rate / P&L analytics.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit: f64,
    pub return_pct: f64,
}

/// Portfolio state handed to strategies at rebalance time.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub cash: f64,
    pub equity: f64,
    pub positions: Vec<PositionView>,
}

/// Resolves a tradable price for `symbol` from `price_snapshot`, falling
/// back from `price_field` to `fallback_price_field`; a non-positive or
/// absent price is treated as untradeable.
fn resolve_price(symbol: &str, price_snapshot: &Snapshot, config: &BacktestConfig) -> Option<f64> {
    let price = price_snapshot
        .get(symbol, &config.price_field)
        .or_else(|| price_snapshot.get(symbol, &config.fallback_price_field))?;
    (price > 0.0).then_some(price)
}

/// Caps `target_weights` to the top `max_positions` by weight (after
/// clamping negatives to zero), then re-adds every currently-held symbol
/// at weight zero so the exit logic still considers it for a full unwind.
fn prepare_weights(target_weights: &BTreeMap<String, f64>, existing_symbols: impl Iterator<Item = String>, max_positions: usize) -> BTreeMap<String, f64> {
    let mut weights: Vec<(String, f64)> = target_weights.iter().map(|(s, w)| (s.clone(), w.max(0.0))).collect();
    weights.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    weights.truncate(max_positions);
    let mut trimmed: BTreeMap<String, f64> = weights.into_iter().collect();
    for symbol in existing_symbols {
        trimmed.entry(symbol).or_insert(0.0);
    }
    trimmed
}

pub struct Portfolio {
    config: BacktestConfig,
    cash: f64,
    positions: BTreeMap<String, Position>,
    total_value: f64,
    last_price_map: BTreeMap<String, f64>,
}

impl Portfolio {
    pub fn new(config: BacktestConfig) -> Self {
        let total_value = config.initial_capital;
        let cash = config.initial_capital;
        Self { config, cash, positions: BTreeMap::new(), total_value, last_price_map: BTreeMap::new() }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    /// Re-prices open positions from `price_snapshot`, holding the last
    /// known price for symbols missing from today's snapshot. Returns the
    /// resolved price map.
    pub fn mark_to_market(&mut self, price_snapshot: &Snapshot) -> BTreeMap<String, f64> {
        let mut price_map = BTreeMap::new();
        let mut positions_value = 0.0;
        for (symbol, position) in &self.positions {
            let price = resolve_price(symbol, price_snapshot, &self.config).or_else(|| self.last_price_map.get(symbol).copied());
            let Some(price) = price else { continue };
            price_map.insert(symbol.clone(), price);
            positions_value += position.quantity * price;
        }
        self.last_price_map = price_map.clone();
        self.total_value = self.cash + positions_value;
        price_map
    }

    pub fn snapshot(&self, current_date: NaiveDate) -> PortfolioSnapshot {
        let positions = self
            .positions
            .iter()
            .map(|(symbol, position)| {
                let market_price = self.last_price_map.get(symbol).copied().unwrap_or(0.0);
                PositionView {
                    symbol: symbol.clone(),
                    quantity: position.quantity,
                    avg_price: position.avg_price,
                    market_price,
                    market_value: position.quantity * market_price,
                }
            })
            .collect();
        PortfolioSnapshot { date: current_date, cash: self.cash, equity: self.total_value, positions }
    }

    pub fn positions_summary(&self) -> BTreeMap<String, PositionView> {
        self.positions
            .iter()
            .map(|(symbol, position)| {
                let market_price = self.last_price_map.get(symbol).copied().unwrap_or(0.0);
                (
                    symbol.clone(),
                    PositionView {
                        symbol: symbol.clone(),
                        quantity: position.quantity,
                        avg_price: position.avg_price,
                        market_price,
                        market_value: position.quantity * market_price,
                    },
                )
            })
            .collect()
    }

    /// Reconciles current holdings with `target_weights`: sells first to
    /// free cash, then scales buys down proportionally if their combined
    /// cost would exceed available cash. Returns closed trades plus
    /// turnover as a fraction of pre-trade equity.
    pub fn rebalance(&mut self, target_weights: &BTreeMap<String, f64>, price_snapshot: &Snapshot, current_date: NaiveDate) -> (Vec<TradeRecord>, f64) {
        let pre_trade_equity = self.total_value;
        if pre_trade_equity <= 0.0 {
            return (Vec::new(), 0.0);
        }

        let mut weights = prepare_weights(target_weights, self.positions.keys().cloned(), self.config.max_positions);
        let weight_sum: f64 = weights.values().map(|w| w.max(0.0)).sum();
        if weight_sum > 1.0 {
            let scale = 1.0 / weight_sum;
            for w in weights.values_mut() {
                *w = w.max(0.0) * scale;
            }
        }

        let slippage = self.config.slippage_factor();
        let fee_factor = self.config.fee_factor();

        let mut sell_orders: Vec<(String, f64, f64)> = Vec::new();
        let mut buy_orders: Vec<(String, f64, f64)> = Vec::new();

        let mut all_symbols: Vec<String> = weights.keys().cloned().collect();
        for symbol in self.positions.keys() {
            if !weights.contains_key(symbol) {
                all_symbols.push(symbol.clone());
            }
        }

        for symbol in &all_symbols {
            let target_weight = weights.get(symbol).copied().unwrap_or(0.0);
            let Some(price) = resolve_price(symbol, price_snapshot, &self.config) else { continue };
            let current_qty = self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0.0);
            let desired_qty = target_weight * pre_trade_equity / price;
            let delta_qty = desired_qty - current_qty;
            if delta_qty < -EPS {
                sell_orders.push((symbol.clone(), delta_qty.abs(), price));
            } else if delta_qty > EPS {
                buy_orders.push((symbol.clone(), delta_qty, price));
            }
        }

        let mut trades = Vec::new();
        let mut turnover_value = 0.0;

        for (symbol, qty, price) in sell_orders {
            let Some(position) = self.positions.get_mut(&symbol) else { continue };
            if qty <= EPS {
                continue;
            }
            let qty = qty.min(position.quantity);
            let effective_price = price * (1.0 - slippage);
            let gross_proceeds = qty * effective_price;
            let transaction_cost = qty * price * fee_factor;
            let cash_received = gross_proceeds - transaction_cost;
            let cost_basis = qty * position.avg_price;
            let profit = cash_received - cost_basis;
            let return_pct = if cost_basis > 0.0 { profit / cost_basis } else { 0.0 };

            self.cash += cash_received;
            position.quantity -= qty;
            let entry_date = position.entry_date;
            let avg_price = position.avg_price;
            if position.quantity <= EPS {
                self.positions.remove(&symbol);
            }
            trades.push(TradeRecord {
                symbol: symbol.clone(),
                entry_date,
                exit_date: current_date,
                quantity: qty,
                entry_price: avg_price,
                exit_price: price,
                profit,
                return_pct,
            });
            turnover_value += qty * price;
        }

        let mut estimated_cash_needed = 0.0;
        for (_, qty, price) in &buy_orders {
            let effective_price = price * (1.0 + slippage);
            let transaction_cost = qty * price * fee_factor;
            estimated_cash_needed += qty * effective_price + transaction_cost;
        }
        if estimated_cash_needed > self.cash && estimated_cash_needed > 0.0 {
            let scale = self.cash / estimated_cash_needed;
            for (_, qty, _) in &mut buy_orders {
                *qty *= scale;
            }
        }

        for (symbol, qty, price) in buy_orders {
            if qty <= EPS {
                continue;
            }
            let effective_price = price * (1.0 + slippage);
            let transaction_cost = qty * price * fee_factor;
            let cash_required = qty * effective_price + transaction_cost;
            if cash_required > self.cash + 1e-6 {
                continue;
            }
            let position = self.positions.entry(symbol.clone()).or_insert_with(|| Position { quantity: 0.0, avg_price: 0.0, entry_date: current_date });
            let was_flat = position.quantity <= EPS;
            let total_cost = position.quantity * position.avg_price + cash_required;
            position.quantity += qty;
            if position.quantity > EPS {
                position.avg_price = total_cost / position.quantity;
                if was_flat {
                    position.entry_date = current_date;
                }
            }
            self.cash -= cash_required;
            turnover_value += qty * price;
        }

        let turnover = if pre_trade_equity > 0.0 { turnover_value / pre_trade_equity } else { 0.0 };
        (trades, turnover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::Panel;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cfg() -> BacktestConfig {
        BacktestConfig { start_date: d(2025, 1, 1), end_date: d(2025, 1, 31), max_positions: 2, ..Default::default() }
    }

    fn snap(rows: &[(&str, f64)]) -> Snapshot {
        let date = d(2025, 1, 1);
        let rows: Vec<(NaiveDate, String, &str, f64)> = rows.iter().map(|(s, v)| (date, s.to_string(), "close", *v)).collect();
        Panel::from_rows(&rows).snapshot(date)
    }

    #[test]
    fn buying_into_a_flat_position_sets_entry_date_and_avg_price() {
        let mut portfolio = Portfolio::new(cfg());
        let snapshot = snap(&[("AAA", 100.0)]);
        portfolio.mark_to_market(&snapshot);
        let mut weights = BTreeMap::new();
        weights.insert("AAA".to_string(), 1.0);
        let (trades, turnover) = portfolio.rebalance(&weights, &snapshot, d(2025, 1, 1));
        assert!(trades.is_empty());
        assert!(turnover > 0.0);
        let summary = portfolio.positions_summary();
        assert_eq!(summary["AAA"].avg_price, 100.0);
    }

    #[test]
    fn selling_to_zero_emits_a_trade_and_clears_the_position() {
        let mut portfolio = Portfolio::new(cfg());
        let snapshot = snap(&[("AAA", 100.0)]);
        portfolio.mark_to_market(&snapshot);
        let mut buy = BTreeMap::new();
        buy.insert("AAA".to_string(), 1.0);
        portfolio.rebalance(&buy, &snapshot, d(2025, 1, 1));
        portfolio.mark_to_market(&snapshot);

        let (trades, _) = portfolio.rebalance(&BTreeMap::new(), &snapshot, d(2025, 1, 2));
        assert_eq!(trades.len(), 1);
        assert!(portfolio.positions_summary().is_empty());
    }

    #[test]
    fn buy_orders_scale_down_when_cash_is_insufficient() {
        let mut portfolio = Portfolio::new(cfg());
        let snapshot = snap(&[("AAA", 100.0), ("BBB", 100.0)]);
        portfolio.mark_to_market(&snapshot);
        let mut weights = BTreeMap::new();
        weights.insert("AAA".to_string(), 0.6);
        weights.insert("BBB".to_string(), 0.6);
        portfolio.rebalance(&weights, &snapshot, d(2025, 1, 1));
        assert!(portfolio.cash() >= -1e-6);
    }

    #[test]
    fn weights_beyond_max_positions_are_trimmed_to_the_top_n() {
        let mut portfolio = Portfolio::new(cfg());
        let snapshot = snap(&[("AAA", 100.0), ("BBB", 100.0), ("CCC", 100.0)]);
        portfolio.mark_to_market(&snapshot);
        let mut weights = BTreeMap::new();
        weights.insert("AAA".to_string(), 0.1);
        weights.insert("BBB".to_string(), 0.5);
        weights.insert("CCC".to_string(), 0.4);
        portfolio.rebalance(&weights, &snapshot, d(2025, 1, 1));
        let summary = portfolio.positions_summary();
        assert_eq!(summary.len(), 2);
        assert!(summary.contains_key("BBB"));
        assert!(summary.contains_key("CCC"));
        assert!(!summary.contains_key("AAA"));
    }
}
