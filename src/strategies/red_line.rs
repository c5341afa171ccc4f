//! Trend-following strategy approximating a red-line trailing-stop system
//! driven by EMA/RSI/ATR indicators (spec §4.12, illustrative). Grounded in
//! `core/strategy/technical/swing_falcon.py`'s indicator preparation and
//! red-line state machine.

use crate::backtest::portfolio::PortfolioSnapshot;
use crate::backtest::strategy::{Strategy, StrategyContext};
use crate::panel::Snapshot;
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
struct Bar {
    date: NaiveDate,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct IndicatorRow {
    ema_short: f64,
    ema_mid: f64,
    rsi: f64,
    atr_trail: f64,
    volume_sma: f64,
    momentum: f64,
    in_long: bool,
}

/// Exponential moving average with seed = first value (pandas' `adjust=False` EWM).
fn ema(values: &[f64], length: usize) -> Vec<f64> {
    if values.is_empty() || length == 0 {
        return vec![f64::NAN; values.len()];
    }
    let alpha = 2.0 / (length as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Wilder-style RSI over `length` periods.
fn rsi(closes: &[f64], length: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if n < 2 || length == 0 {
        return out;
    }
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let delta = closes[i] - closes[i - 1];
        gains[i] = delta.max(0.0);
        losses[i] = (-delta).max(0.0);
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..n {
        if i <= length {
            avg_gain += gains[i] / length as f64;
            avg_loss += losses[i] / length as f64;
        } else {
            avg_gain = (avg_gain * (length as f64 - 1.0) + gains[i]) / length as f64;
            avg_loss = (avg_loss * (length as f64 - 1.0) + losses[i]) / length as f64;
        }
        if i >= length {
            out[i] = if avg_loss == 0.0 { 100.0 } else { 100.0 - 100.0 / (1.0 + avg_gain / avg_loss) };
        }
    }
    out
}

/// Wilder-style ATR over `length` periods using true range.
fn atr(highs: &[f64], lows: &[f64], closes: &[f64], length: usize) -> Vec<f64> {
    let n = closes.len();
    let mut tr = vec![0.0; n];
    for i in 0..n {
        tr[i] = if i == 0 {
            highs[i] - lows[i]
        } else {
            (highs[i] - lows[i]).max((highs[i] - closes[i - 1]).abs()).max((lows[i] - closes[i - 1]).abs())
        };
    }
    let mut out = vec![f64::NAN; n];
    if length == 0 {
        return out;
    }
    let mut avg = 0.0;
    for i in 0..n {
        if i < length {
            avg += tr[i] / length as f64;
        } else {
            avg = (avg * (length as f64 - 1.0) + tr[i]) / length as f64;
        }
        if i >= length - 1 {
            out[i] = avg;
        }
    }
    out
}

fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        let count = (i + 1).min(window);
        out[i] = sum / count as f64;
    }
    out
}

pub struct RedLineStrategy {
    pub max_positions: usize,
    pub ema_short_len: usize,
    pub ema_mid_len: usize,
    pub rsi_len: usize,
    pub atr_trail_len: usize,
    pub volume_lookback: usize,
    pub rsi_buy_threshold: f64,
    pub rsi_exit_threshold: f64,
    pub buy_volume_factor: f64,
    pub trail_atr_mult: f64,
    pub price_field: Option<String>,
    pub universe_overrides: Option<Vec<String>>,

    pub indicator_rows: BTreeMap<String, BTreeMap<NaiveDate, IndicatorRow>>,
}

impl Default for RedLineStrategy {
    fn default() -> Self {
        Self {
            max_positions: 10,
            ema_short_len: 21,
            ema_mid_len: 55,
            rsi_len: 14,
            atr_trail_len: 10,
            volume_lookback: 20,
            rsi_buy_threshold: 55.0,
            rsi_exit_threshold: 48.0,
            buy_volume_factor: 1.1,
            trail_atr_mult: 2.0,
            price_field: None,
            universe_overrides: None,
            indicator_rows: BTreeMap::new(),
        }
    }
}

impl RedLineStrategy {
    fn candidate_universe(&self, context: &StrategyContext) -> Vec<String> {
        match &self.universe_overrides {
            Some(overrides) if !overrides.is_empty() => {
                let mut seen = std::collections::BTreeSet::new();
                overrides.iter().filter(|s| seen.insert((*s).clone())).cloned().collect()
            }
            _ => context.universe.to_vec(),
        }
    }

    fn build_bars(context: &StrategyContext, symbol: &str, price_field: &str) -> Vec<Bar> {
        let closes = context.price_history.series(symbol, price_field);
        let highs: BTreeMap<NaiveDate, f64> = context.price_history.series(symbol, "high").into_iter().collect();
        let lows: BTreeMap<NaiveDate, f64> = context.price_history.series(symbol, "low").into_iter().collect();
        let volumes: BTreeMap<NaiveDate, f64> = context.price_history.series(symbol, "volume").into_iter().collect();

        closes
            .into_iter()
            .filter_map(|(date, close)| {
                let high = *highs.get(&date)?;
                let low = *lows.get(&date)?;
                let volume = volumes.get(&date).copied().unwrap_or(0.0);
                Some(Bar { date, high, low, close, volume })
            })
            .collect()
    }

    /// Runs the red-line state machine over one symbol's bars, returning a
    /// per-date indicator row used at rebalance time.
    fn compute_indicators(&self, bars: &[Bar]) -> BTreeMap<NaiveDate, IndicatorRow> {
        if bars.is_empty() {
            return BTreeMap::new();
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let ema_short = ema(&closes, self.ema_short_len);
        let ema_mid = ema(&closes, self.ema_mid_len);
        let ema_long = ema(&closes, self.ema_mid_len * 2);
        let rsi_values = rsi(&closes, self.rsi_len);
        let atr_trail = atr(&highs, &lows, &closes, self.atr_trail_len);
        let volume_sma = rolling_mean(&volumes, self.volume_lookback);

        let mut out = BTreeMap::new();
        let mut in_long = false;
        let mut trail_high: Option<f64> = None;
        let mut trail_level = f64::NAN;

        for i in 0..bars.len() {
            let momentum = if i >= self.ema_short_len && closes[i - self.ema_short_len] != 0.0 {
                closes[i] / closes[i - self.ema_short_len] - 1.0
            } else {
                0.0
            };
            let bull_structure = ema_short[i] > ema_mid[i] && ema_mid[i] > ema_long[i] && closes[i] > ema_mid[i];

            if in_long {
                trail_high = Some(trail_high.map_or(highs[i], |h| h.max(highs[i])));
                if atr_trail[i].is_finite() {
                    let candidate = trail_high.unwrap() - atr_trail[i] * self.trail_atr_mult;
                    if !trail_level.is_finite() || candidate > trail_level {
                        trail_level = candidate;
                    }
                }
                let exit_on_stop = trail_level.is_finite() && closes[i] < trail_level;
                let exit_on_rsi = rsi_values[i].is_finite() && rsi_values[i] < self.rsi_exit_threshold;
                if exit_on_stop || exit_on_rsi {
                    in_long = false;
                    trail_high = None;
                    trail_level = f64::NAN;
                }
            }
            if !in_long {
                let volume_ok = volume_sma[i] > 0.0 && volumes[i] >= volume_sma[i] * self.buy_volume_factor;
                let rsi_ok = rsi_values[i].is_finite() && rsi_values[i] >= self.rsi_buy_threshold;
                let close_ok = ema_short[i].is_finite() && closes[i] >= ema_short[i];
                let atr_ready = atr_trail[i].is_finite();
                if bull_structure && volume_ok && rsi_ok && close_ok && atr_ready {
                    in_long = true;
                    trail_high = Some(highs[i]);
                    trail_level = highs[i] - atr_trail[i] * self.trail_atr_mult;
                }
            }

            out.insert(
                bars[i].date,
                IndicatorRow { ema_short: ema_short[i], ema_mid: ema_mid[i], rsi: rsi_values[i], atr_trail: atr_trail[i], volume_sma: volume_sma[i], momentum, in_long },
            );
        }
        out
    }
}

impl Strategy for RedLineStrategy {
    fn initialize(&mut self, context: &StrategyContext) {
        let price_field = self.price_field.clone().unwrap_or_else(|| context.config.price_field.clone());
        let price_field = if context.price_history.has_field(&price_field) { price_field } else { context.config.fallback_price_field.clone() };

        self.indicator_rows.clear();
        for symbol in self.candidate_universe(context) {
            let bars = Self::build_bars(context, &symbol, &price_field);
            if bars.is_empty() {
                continue;
            }
            self.indicator_rows.insert(symbol, self.compute_indicators(&bars));
        }
    }

    fn on_rebalance(&mut self, as_of: NaiveDate, _context: &StrategyContext, price_snapshot: &Snapshot, _portfolio: &PortfolioSnapshot) -> BTreeMap<String, f64> {
        let mut scored: Vec<(String, f64)> = Vec::new();
        for (symbol, rows) in &self.indicator_rows {
            if !price_snapshot.contains_symbol(symbol) {
                continue;
            }
            if let Some(row) = rows.get(&as_of) {
                if row.in_long {
                    scored.push((symbol.clone(), row.momentum));
                }
            }
        }
        if scored.is_empty() {
            return BTreeMap::new();
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_positions.max(1));
        let weight = 1.0 / scored.len() as f64;
        scored.into_iter().map(|(s, _)| (s, weight)).collect()
    }
}
