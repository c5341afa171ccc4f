//! Event-driven backtest engine (spec §4.10). Grounded in
//! `core/backtest/engine.py`'s `BacktestEngine.run` and
//! `_compute_rebalance_dates`.

use super::config::BacktestConfig;
use super::portfolio::Portfolio;
use super::result::{forward_fill, summarize, BacktestResult};
use super::strategy::{Strategy, StrategyContext};
use crate::error::BacktestError;
use crate::panel::Panel;
use crate::providers::{FundamentalDataProvider, PriceDataProvider, UniverseProvider};
use chrono::{Datelike, IsoWeek, NaiveDate};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Run lifecycle (spec §4.10 "State machine"). Not exposed beyond a single
/// `run()` call; kept as a type for clarity in error paths and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Initialized,
    Running,
    Done,
    Failed,
}

pub struct BacktestEngine {
    config: BacktestConfig,
    price_provider: Arc<dyn PriceDataProvider>,
    fundamental_provider: Option<Arc<dyn FundamentalDataProvider>>,
    universe_provider: Option<Arc<dyn UniverseProvider>>,
}

impl BacktestEngine {
    pub fn new(
        config: BacktestConfig,
        price_provider: Arc<dyn PriceDataProvider>,
        fundamental_provider: Option<Arc<dyn FundamentalDataProvider>>,
        universe_provider: Option<Arc<dyn UniverseProvider>>,
    ) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self { config, price_provider, fundamental_provider, universe_provider })
    }

    pub async fn run(&self, strategy: &mut dyn Strategy, universe: Option<&[String]>) -> Result<BacktestResult, BacktestError> {
        let mut state = EngineState::Constructed;

        let resolved_universe = self.resolve_universe(universe).await;
        if resolved_universe.is_empty() {
            state = EngineState::Failed;
            let _ = state;
            return Err(BacktestError::EmptyUniverse);
        }

        let price_history = self.load_price_history(&resolved_universe).await?;
        if price_history.is_empty() {
            return Err(BacktestError::EmptyPriceHistory);
        }
        if !price_history.has_field(&self.config.price_field) && !price_history.has_field(&self.config.fallback_price_field) {
            return Err(BacktestError::MissingPriceFields);
        }

        let date_index = price_history.dates().to_vec();
        let fundamentals = self.load_fundamentals(&resolved_universe).await;

        let rebalance_schedule: BTreeSet<NaiveDate> = compute_rebalance_dates(&date_index, &self.config.rebalance_frequency)?.into_iter().collect();

        let mut context = StrategyContext {
            price_history: &price_history,
            fundamentals: &fundamentals,
            config: &self.config,
            universe: &resolved_universe,
            current_date: None,
        };
        strategy.initialize(&context);
        state = EngineState::Initialized;

        let mut portfolio = Portfolio::new(self.config.clone());
        let mut equity_sparse: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        let mut turnover_series = Vec::new();
        let mut trades = Vec::new();

        state = EngineState::Running;
        for &current_date in &date_index {
            let price_snapshot = price_history.snapshot(current_date);
            portfolio.mark_to_market(&price_snapshot);
            context.current_date = Some(current_date);

            if rebalance_schedule.contains(&current_date) {
                let portfolio_snapshot = portfolio.snapshot(current_date);
                let target_weights = strategy.on_rebalance(current_date, &context, &price_snapshot, &portfolio_snapshot);
                let (closed_trades, turnover) = portfolio.rebalance(&target_weights, &price_snapshot, current_date);
                if turnover > 0.0 {
                    turnover_series.push((current_date, turnover));
                }
                trades.extend(closed_trades);
                portfolio.mark_to_market(&price_snapshot);
            }
            equity_sparse.insert(current_date, portfolio.total_value());
        }

        let equity_curve = forward_fill(&date_index, &equity_sparse);
        let ending_positions = portfolio.positions_summary();
        let ending_cash = portfolio.cash();

        state = EngineState::Done;
        let _ = state;
        Ok(summarize(self.config.clone(), equity_curve, trades, turnover_series, ending_positions, ending_cash))
    }

    /// Caller-provided universe (normalized upper-case, order-preserving
    /// dedup) overrides the universe provider callback.
    async fn resolve_universe(&self, universe: Option<&[String]>) -> Vec<String> {
        let raw: Vec<String> = match universe {
            Some(explicit) => explicit.to_vec(),
            None => match &self.universe_provider {
                Some(provider) => provider.call(&self.config).await.unwrap_or_default(),
                None => Vec::new(),
            },
        };
        let mut seen = BTreeSet::new();
        raw.into_iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect()
    }

    async fn load_price_history(&self, universe: &[String]) -> Result<Panel, BacktestError> {
        let mut fields: Vec<String> = self.config.price_fields.clone().unwrap_or_else(|| {
            vec![self.config.price_field.clone(), self.config.fallback_price_field.clone(), "open".to_string(), "high".to_string(), "low".to_string(), "volume".to_string()]
        });
        fields.sort();
        fields.dedup();

        let panel = self
            .price_provider
            .load(universe, self.config.start_date, self.config.end_date, Some(&fields))
            .await
            .map_err(|e| BacktestError::Invalid(e.to_string()))?;
        Ok(panel.slice_range(self.config.start_date, self.config.end_date))
    }

    async fn load_fundamentals(&self, universe: &[String]) -> BTreeMap<String, BTreeMap<String, f64>> {
        let Some(provider) = &self.fundamental_provider else { return BTreeMap::new() };
        let attributes = self.config.fundamental_fields.clone();
        provider.load(universe, attributes.as_deref()).await.unwrap_or_default()
    }
}

/// Returns the last date seen for each distinct `key_fn(date)` group, in
/// chronological order — the shared building block for weekly/monthly
/// anchors, which pandas computes via `resample(...).last()`. `dates` is
/// already sorted, so consecutive runs of equal keys are exactly the
/// groups we want.
fn group_last_by_key<K: PartialEq>(dates: &[NaiveDate], key_fn: impl Fn(NaiveDate) -> K) -> Vec<NaiveDate> {
    dates.iter().copied().chunk_by(|&date| key_fn(date)).into_iter().map(|(_, group)| group.last().unwrap()).collect()
}

fn iso_week_key(date: NaiveDate) -> (i32, u32) {
    let week: IsoWeek = date.iso_week();
    (week.year(), week.week())
}

/// Computes the rebalance date set from the unique price-history date
/// index and a frequency string (spec §4.10 step 3).
pub fn compute_rebalance_dates(date_index: &[NaiveDate], frequency: &str) -> Result<Vec<NaiveDate>, BacktestError> {
    if date_index.is_empty() {
        return Ok(Vec::new());
    }
    let freq = frequency.to_lowercase();

    let anchors: Vec<NaiveDate> = if freq == "daily" {
        date_index.to_vec()
    } else if freq == "weekly" {
        group_last_by_key(date_index, iso_week_key)
    } else if freq == "monthly" {
        group_last_by_key(date_index, |d| (d.year(), d.month()))
    } else if let Some(step) = freq.strip_suffix('d').filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())) {
        let step: usize = step.parse().unwrap_or(1);
        date_index.iter().step_by(step.max(1)).copied().collect()
    } else {
        return Err(BacktestError::UnsupportedFrequency(frequency.to_string()));
    };

    // Map each anchor to the nearest prior index date, then dedup
    // preserving chronological order (anchors from group_last_by_key /
    // the Nd stride are already literal index dates, but this mapping
    // stays generic so future anchor strategies need not be literal).
    let mut mapped = Vec::new();
    for anchor in anchors {
        let position = match date_index.binary_search(&anchor) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let date = date_index[position];
        if mapped.last() != Some(&date) {
            mapped.push(date);
        }
    }
    Ok(mapped)
}
