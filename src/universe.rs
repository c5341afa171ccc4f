//! Universe selector: catalog candidates filtered by a fundamentals
//! threshold bundle, with a documented strict/permissive switch for
//! missing-metric handling (spec §4.9, §8 open question). Grounded in
//! `core/universe/swing_falcon.py`'s `SwingFalconUniverseSelector`.

use crate::catalog::{AssetType, CatalogService, CatalogStatus};
use crate::company::CompanyService;
use crate::error::Error;
use std::collections::BTreeMap;

/// How a missing metric is scored against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingMetricMode {
    /// "Fail if absent": a missing metric fails its check.
    Strict,
    /// "Pass unless present and failing": a missing metric is non-blocking.
    Permissive,
}

#[derive(Debug, Clone)]
pub struct UniverseThresholds {
    pub market_cap_min: Option<f64>,
    pub pe_max: Option<f64>,
    pub eps_growth_min: Option<f64>,
    pub roe_min: Option<f64>,
    pub revenue_growth_min: Option<f64>,
    pub beta_min: Option<f64>,
    pub beta_max: Option<f64>,
}

impl Default for UniverseThresholds {
    fn default() -> Self {
        Self {
            market_cap_min: None,
            pe_max: None,
            eps_growth_min: None,
            roe_min: None,
            revenue_growth_min: None,
            beta_min: None,
            beta_max: None,
        }
    }
}

/// Per-candidate evaluation trace surfaced for diagnostics (spec §4.9).
#[derive(Debug, Clone)]
pub struct CandidateEvaluation {
    pub symbol: String,
    pub market_cap: Option<f64>,
    pub pe: Option<f64>,
    pub eps_growth: Option<f64>,
    pub roe: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub beta: Option<f64>,
    pub market_cap_pass: bool,
    pub pe_pass: bool,
    pub eps_growth_pass: bool,
    pub roe_pass: bool,
    pub revenue_growth_pass: bool,
    pub beta_pass: bool,
    pub passed: bool,
}

/// Raw per-symbol fundamentals input to evaluation, after any missing
/// values have been derived from price + EPS (spec §4.9).
#[derive(Debug, Clone, Default)]
pub struct FundamentalsRow {
    pub market_cap: Option<f64>,
    pub pe_ttm: Option<f64>,
    pub eps_growth_ttm_yoy: Option<f64>,
    pub roe_ttm: Option<f64>,
    pub revenue_growth_ttm_yoy: Option<f64>,
    pub beta_5y: Option<f64>,
}

/// Fills `market_cap`/`pe_ttm`/`roe_ttm` from `price`, `eps`, `implied_shares`,
/// `net_income`, `equity` when the metric itself is absent, mirroring the
/// "missing metrics may be derived from price + EPS" rule of spec §4.9.
pub fn derive_missing_metrics(
    mut row: FundamentalsRow,
    price: Option<f64>,
    eps: Option<f64>,
    implied_shares: Option<f64>,
    net_income: Option<f64>,
    equity: Option<f64>,
) -> FundamentalsRow {
    if row.market_cap.is_none() {
        if let (Some(price), Some(shares)) = (price, implied_shares) {
            if shares > 0.0 {
                row.market_cap = Some(price * shares);
            }
        }
    }
    if row.pe_ttm.is_none() {
        if let (Some(price), Some(eps)) = (price, eps) {
            if eps != 0.0 {
                let v = price / eps;
                row.pe_ttm = v.is_finite().then_some(v);
            }
        }
    }
    if row.roe_ttm.is_none() {
        if let (Some(net_income), Some(equity)) = (net_income, equity) {
            if equity != 0.0 {
                let v = net_income / equity;
                row.roe_ttm = v.is_finite().then_some(v);
            }
        }
    }
    row
}

fn check(value: Option<f64>, mode: MissingMetricMode, predicate: impl Fn(f64) -> bool) -> bool {
    match value {
        Some(v) => predicate(v),
        None => matches!(mode, MissingMetricMode::Permissive),
    }
}

/// Evaluates one candidate against `thresholds`, returning the full trace.
pub fn evaluate_candidate(symbol: &str, row: &FundamentalsRow, thresholds: &UniverseThresholds, mode: MissingMetricMode) -> CandidateEvaluation {
    let market_cap_pass = match thresholds.market_cap_min {
        Some(min) => check(row.market_cap, mode, |v| v >= min),
        None => true,
    };
    let pe_pass = match thresholds.pe_max {
        Some(max) => check(row.pe_ttm, mode, |v| v <= max),
        None => true,
    };
    let eps_growth_pass = match thresholds.eps_growth_min {
        Some(min) => check(row.eps_growth_ttm_yoy, mode, |v| v >= min),
        None => true,
    };
    let roe_pass = match thresholds.roe_min {
        Some(min) => check(row.roe_ttm, mode, |v| v >= min),
        None => true,
    };
    let revenue_growth_pass = match thresholds.revenue_growth_min {
        Some(min) => check(row.revenue_growth_ttm_yoy, mode, |v| v >= min),
        None => true,
    };
    let beta_pass = match (thresholds.beta_min, thresholds.beta_max) {
        (None, None) => true,
        (min, max) => check(row.beta_5y, mode, |v| min.is_none_or(|lo| v >= lo) && max.is_none_or(|hi| v <= hi)),
    };

    let passed = market_cap_pass && pe_pass && eps_growth_pass && roe_pass && revenue_growth_pass && beta_pass;

    CandidateEvaluation {
        symbol: symbol.to_string(),
        market_cap: row.market_cap,
        pe: row.pe_ttm,
        eps_growth: row.eps_growth_ttm_yoy,
        roe: row.roe_ttm,
        revenue_growth: row.revenue_growth_ttm_yoy,
        beta: row.beta_5y,
        market_cap_pass,
        pe_pass,
        eps_growth_pass,
        roe_pass,
        revenue_growth_pass,
        beta_pass,
        passed,
    }
}

pub struct UniverseSelector {
    catalog: CatalogService,
    company: CompanyService,
    pub thresholds: UniverseThresholds,
    pub mode: MissingMetricMode,
    pub limit: usize,
}

impl UniverseSelector {
    pub fn new(catalog: CatalogService, company: CompanyService, thresholds: UniverseThresholds, mode: MissingMetricMode, limit: usize) -> Self {
        Self { catalog, company, thresholds, mode, limit }
    }

    /// Loads candidates from the catalog (querying first, scanning as a
    /// fallback), batch-fetches fundamentals, evaluates every candidate,
    /// and returns the selected symbols plus the full diagnostic trace.
    pub async fn select(&self, asset_type: AssetType, market: &str) -> Result<(Vec<String>, Vec<CandidateEvaluation>), Error> {
        let over_fetch = Some(self.limit.saturating_mul(5).max(self.limit));
        let mut candidates = self.catalog.query_catalog(asset_type, market, CatalogStatus::Active, over_fetch).await?;
        if candidates.is_empty() {
            candidates = self
                .catalog
                .scan_catalog(Some(asset_type), Some(market), Some(CatalogStatus::Active), over_fetch)
                .await?;
        }

        let mut seen = std::collections::BTreeSet::new();
        let symbols: Vec<String> = candidates
            .drain(..)
            .map(|c| c.symbol.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        if symbols.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let fundamentals = self.company.batch_get_companies(&symbols).await?;

        let mut selected = Vec::new();
        let mut trace = Vec::new();
        for symbol in &symbols {
            let Some(company) = fundamentals.get(symbol) else { continue };
            let row = company_to_fundamentals_row(&company.metrics);
            let evaluation = evaluate_candidate(symbol, &row, &self.thresholds, self.mode);
            let passed = evaluation.passed;
            trace.push(evaluation);
            if passed {
                selected.push(symbol.clone());
            }
            if self.limit > 0 && selected.len() >= self.limit {
                break;
            }
        }
        Ok((selected, trace))
    }
}

fn company_to_fundamentals_row(metrics: &BTreeMap<String, rust_decimal::Decimal>) -> FundamentalsRow {
    use rust_decimal::prelude::ToPrimitive;
    let get = |key: &str| metrics.get(key).and_then(|d| d.to_f64());
    FundamentalsRow {
        market_cap: get("market_cap"),
        pe_ttm: get("pe_ttm"),
        eps_growth_ttm_yoy: get("eps_growth_ttm_yoy"),
        roe_ttm: get("roe_ttm"),
        revenue_growth_ttm_yoy: get("revenue_growth_ttm_yoy"),
        beta_5y: get("beta_5y"),
    }
}
