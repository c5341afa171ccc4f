//! Aggregated outcome of a backtest run (spec §4.10 "Analytics"). Grounded
//! in `core/backtest/engine.py`'s `BacktestResult`.

use super::config::BacktestConfig;
use super::portfolio::{PositionView, TradeRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub equity_curve: Vec<(NaiveDate, f64)>,
    pub daily_returns: Vec<(NaiveDate, f64)>,
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub num_trades: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub trades: Vec<TradeRecord>,
    pub daily_turnover: Vec<(NaiveDate, f64)>,
    pub ending_positions: BTreeMap<String, PositionView>,
    pub ending_cash: f64,
}

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Forward-fills a sparse `(date, value)` series across every date in
/// `dates` (spec §4.10 "equity_curve ... forward-filled across missing
/// dates").
pub fn forward_fill(dates: &[NaiveDate], sparse: &BTreeMap<NaiveDate, f64>) -> Vec<(NaiveDate, f64)> {
    let mut out = Vec::with_capacity(dates.len());
    let mut last = None;
    for &date in dates {
        if let Some(&v) = sparse.get(&date) {
            last = Some(v);
        }
        if let Some(v) = last {
            out.push((date, v));
        }
    }
    out
}

/// Percentage change of `equity_curve`; infinities and NaN become 0.0.
pub fn daily_returns(equity_curve: &[(NaiveDate, f64)]) -> Vec<(NaiveDate, f64)> {
    let mut out = Vec::with_capacity(equity_curve.len());
    for window in equity_curve.windows(2) {
        let (prev_date, prev) = window[0];
        let (date, curr) = window[1];
        let _ = prev_date;
        let mut r = (curr - prev) / prev;
        if !r.is_finite() {
            r = 0.0;
        }
        out.push((date, r));
    }
    out
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation (ddof = 0), matching pandas' default for
/// this crate's usage (spec §4.10's `σ(returns, ddof=0)`).
fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn max_drawdown(equity_curve: &[(NaiveDate, f64)]) -> f64 {
    if equity_curve.is_empty() {
        return 0.0;
    }
    let mut running_max = f64::MIN;
    let mut worst = 0.0f64;
    for &(_, v) in equity_curve {
        running_max = running_max.max(v);
        if running_max > 0.0 {
            worst = worst.min(v / running_max - 1.0);
        }
    }
    worst
}

/// Computes every `BacktestResult` analytics field from a forward-filled
/// equity curve and the closed trade list.
pub fn summarize(config: BacktestConfig, equity_curve: Vec<(NaiveDate, f64)>, trades: Vec<TradeRecord>, daily_turnover: Vec<(NaiveDate, f64)>, ending_positions: BTreeMap<String, PositionView>, ending_cash: f64) -> BacktestResult {
    let returns = daily_returns(&equity_curve);
    let return_values: Vec<f64> = returns.iter().map(|(_, r)| *r).collect();

    let total_return = if equity_curve.len() > 1 { equity_curve.last().unwrap().1 / equity_curve[0].1 - 1.0 } else { 0.0 };

    let periods = equity_curve.len();
    let annualized_return = if periods > 1 && equity_curve[0].1 > 0.0 {
        (equity_curve.last().unwrap().1 / equity_curve[0].1).powf(TRADING_DAYS_PER_YEAR / periods as f64) - 1.0
    } else {
        0.0
    };

    let volatility = population_stddev(&return_values) * TRADING_DAYS_PER_YEAR.sqrt();
    let sharpe_ratio = if volatility > 0.0 {
        let sigma = population_stddev(&return_values);
        mean(&return_values) / sigma * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let wins = trades.iter().filter(|t| t.profit > 0.0).count();
    let losses = trades.iter().filter(|t| t.profit < 0.0).count();
    let win_rate = if wins + losses > 0 { wins as f64 / (wins + losses) as f64 } else { 0.0 };
    let gross_profit: f64 = trades.iter().filter(|t| t.profit > 0.0).map(|t| t.profit).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.profit < 0.0).map(|t| t.profit).sum();

    BacktestResult {
        max_drawdown: max_drawdown(&equity_curve),
        num_trades: trades.len(),
        config,
        equity_curve,
        daily_returns: returns,
        total_return,
        annualized_return,
        volatility,
        sharpe_ratio,
        win_rate,
        gross_profit,
        gross_loss,
        trades,
        daily_turnover,
        ending_positions,
        ending_cash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn forward_fill_holds_last_value_across_missing_dates() {
        let dates = vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3)];
        let mut sparse = BTreeMap::new();
        sparse.insert(d(2025, 1, 1), 100.0);
        sparse.insert(d(2025, 1, 3), 110.0);
        let filled = forward_fill(&dates, &sparse);
        assert_eq!(filled, vec![(d(2025, 1, 1), 100.0), (d(2025, 1, 2), 100.0), (d(2025, 1, 3), 110.0)]);
    }

    #[test]
    fn total_return_is_zero_for_single_point_series() {
        let config = BacktestConfig::default();
        let result = summarize(config, vec![(d(2025, 1, 1), 100.0)], Vec::new(), Vec::new(), BTreeMap::new(), 100.0);
        assert_eq!(result.total_return, 0.0);
    }

    #[test]
    fn max_drawdown_reflects_the_largest_peak_to_trough_decline() {
        let curve = vec![(d(2025, 1, 1), 100.0), (d(2025, 1, 2), 120.0), (d(2025, 1, 3), 90.0)];
        assert!((max_drawdown(&curve) - (90.0 / 120.0 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn win_rate_excludes_zero_profit_trades_from_denominator() {
        let config = BacktestConfig::default();
        let trades = vec![
            TradeRecord { symbol: "A".into(), entry_date: d(2025, 1, 1), exit_date: d(2025, 1, 2), quantity: 1.0, entry_price: 1.0, exit_price: 2.0, profit: 1.0, return_pct: 1.0 },
            TradeRecord { symbol: "B".into(), entry_date: d(2025, 1, 1), exit_date: d(2025, 1, 2), quantity: 1.0, entry_price: 1.0, exit_price: 1.0, profit: 0.0, return_pct: 0.0 },
        ];
        let result = summarize(config, vec![(d(2025, 1, 1), 100.0)], trades, Vec::new(), BTreeMap::new(), 100.0);
        assert_eq!(result.win_rate, 1.0);
    }
}
