//! Backtest run configuration (spec §4.10). Grounded in
//! `core/backtest/engine.py`'s `BacktestConfig.validate`.

use crate::error::BacktestError;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub rebalance_frequency: String,
    pub max_positions: usize,
    pub slippage_bps: f64,
    pub transaction_cost_bps: f64,
    pub price_field: String,
    pub fallback_price_field: String,
    pub min_weight: f64,
    pub price_fields: Option<Vec<String>>,
    pub fundamental_fields: Option<Vec<String>>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            initial_capital: 1_000_000.0,
            rebalance_frequency: "weekly".to_string(),
            max_positions: 100,
            slippage_bps: 0.0,
            transaction_cost_bps: 0.0,
            price_field: "adj_close".to_string(),
            fallback_price_field: "close".to_string(),
            min_weight: 0.0,
            price_fields: None,
            fundamental_fields: None,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.start_date > self.end_date {
            return Err(BacktestError::Invalid("start_date must be on or before end_date".into()));
        }
        if self.initial_capital <= 0.0 {
            return Err(BacktestError::Invalid("initial_capital must be positive".into()));
        }
        if self.max_positions == 0 {
            return Err(BacktestError::Invalid("max_positions must be positive".into()));
        }
        if self.slippage_bps < 0.0 || self.transaction_cost_bps < 0.0 {
            return Err(BacktestError::Invalid("cost parameters cannot be negative".into()));
        }
        if self.rebalance_frequency.trim().is_empty() {
            return Err(BacktestError::Invalid("rebalance_frequency must be provided".into()));
        }
        if self.min_weight < 0.0 {
            return Err(BacktestError::Invalid("min_weight cannot be negative".into()));
        }
        Ok(())
    }

    pub fn slippage_factor(&self) -> f64 {
        self.slippage_bps / 10_000.0
    }

    pub fn fee_factor(&self) -> f64 {
        self.transaction_cost_bps / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BacktestConfig {
        BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn start_after_end_is_rejected() {
        let mut cfg = valid();
        cfg.start_date = cfg.end_date + chrono::Duration::days(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nonpositive_capital_is_rejected() {
        let mut cfg = valid();
        cfg.initial_capital = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_costs_are_rejected() {
        let mut cfg = valid();
        cfg.slippage_bps = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_min_weight_is_rejected() {
        let mut cfg = valid();
        cfg.min_weight = -0.01;
        assert!(cfg.validate().is_err());
    }
}
