//! `backtest-runner`: the CLI surface of spec.md §6. Wires an in-memory
//! repository (the local demo mode, standing in for the external
//! persistence engine), a deterministic synthetic quote/fundamentals feed,
//! a universe source, and the event-driven backtest engine.

use chrono::{Datelike, NaiveDate};
use clap::Parser;
use quant_core::backtest::config::BacktestConfig;
use quant_core::backtest::engine::BacktestEngine;
use quant_core::catalog::{AssetType, CatalogEntry, CatalogService, CatalogStatus};
use quant_core::company::{Company, CompanyService};
use quant_core::error::Error;
use quant_core::panel::Panel;
use quant_core::providers::{FundamentalDataProvider, PriceDataProvider};
use quant_core::repository::memory::InMemoryRepository;
use quant_core::strategies::low_pe_momentum::LowPeMomentumStrategy;
use quant_core::strategies::red_line::RedLineStrategy;
use quant_core::universe::{MissingMetricMode, UniverseSelector, UniverseThresholds};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "backtest-runner", about = "Run an event-driven equity backtest")]
struct Cli {
    #[arg(long, value_parser = parse_date)]
    start_date: NaiveDate,

    #[arg(long, value_parser = parse_date)]
    end_date: NaiveDate,

    #[arg(long, default_value_t = 1_000_000.0)]
    initial_capital: f64,

    #[arg(long, default_value = "weekly")]
    rebalance: String,

    #[arg(long, default_value_t = 100)]
    max_positions: usize,

    #[arg(long, default_value = "adj_close")]
    price_field: String,

    #[arg(long, default_value = "close")]
    fallback_price_field: String,

    /// Comma-separated explicit symbol list.
    #[arg(long)]
    universe_list: Option<String>,

    /// Path to a newline-delimited symbol file.
    #[arg(long)]
    universe_file: Option<PathBuf>,

    /// Select the universe via the catalog + fundamentals filter instead of
    /// an explicit list.
    #[arg(long, default_value_t = false)]
    dynamic_universe: bool,

    #[arg(long = "filter-market-cap-min")]
    filter_market_cap_min: Option<f64>,
    #[arg(long = "filter-pe-max")]
    filter_pe_max: Option<f64>,
    #[arg(long = "filter-eps-growth-min")]
    filter_eps_growth_min: Option<f64>,
    #[arg(long = "filter-roe-min")]
    filter_roe_min: Option<f64>,
    #[arg(long = "filter-revenue-growth-min")]
    filter_revenue_growth_min: Option<f64>,
    #[arg(long = "filter-beta-min")]
    filter_beta_min: Option<f64>,
    #[arg(long = "filter-beta-max")]
    filter_beta_max: Option<f64>,

    #[arg(long, default_value = "low-pe-momentum")]
    strategy: String,

    #[arg(long, default_value = "./output")]
    output_dir: PathBuf,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| e.to_string())
}

/// Reads the universe from `--universe-list`/`--universe-file`, normalizing
/// and order-preserving deduping the way [`BacktestEngine::resolve_universe`]
/// does for its own explicit-list path.
fn explicit_universe(cli: &Cli) -> Result<Option<Vec<String>>, Error> {
    let mut raw = Vec::new();
    if let Some(list) = &cli.universe_list {
        raw.extend(list.split(',').map(|s| s.trim().to_string()));
    }
    if let Some(path) = &cli.universe_file {
        let contents = std::fs::read_to_string(path).map_err(|e| quant_core::error::InvalidInputError::Config(format!("reading universe file {}: {e}", path.display())))?;
        raw.extend(contents.lines().map(|l| l.trim().to_string()));
    }
    if raw.is_empty() {
        return Ok(None);
    }
    let mut seen = std::collections::BTreeSet::new();
    let symbols: Vec<String> = raw.into_iter().map(|s| s.to_uppercase()).filter(|s| !s.is_empty() && seen.insert(s.clone())).collect();
    Ok(Some(symbols))
}

/// Deterministic synthetic OHLCV generator seeded from the symbol's bytes,
/// standing in for a real upstream feed in the CLI's local demo mode.
fn synthetic_quote_panel(symbols: &[String], start: NaiveDate, end: NaiveDate) -> Panel {
    let dates: Vec<NaiveDate> = {
        let mut d = start;
        let mut out = Vec::new();
        while d <= end {
            if !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                out.push(d);
            }
            d += chrono::Duration::days(1);
        }
        out
    };

    let mut panel = Panel::empty(dates.clone(), symbols.to_vec());
    for symbol in symbols {
        let mut seed: u64 = symbol.bytes().fold(1469598103934665603u64, |acc, b| (acc ^ b as u64).wrapping_mul(1099511628211));
        let mut price = 50.0 + (seed % 200) as f64;
        for &date in &dates {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let drift = ((seed >> 33) as f64 / u32::MAX as f64 - 0.5) * 2.0;
            price = (price * (1.0 + drift * 0.01)).max(1.0);
            panel.set(date, symbol, "open", price);
            panel.set(date, symbol, "high", price * 1.01);
            panel.set(date, symbol, "low", price * 0.99);
            panel.set(date, symbol, "close", price);
            panel.set(date, symbol, "adj_close", price);
            panel.set(date, symbol, "volume", 1_000_000.0 + (seed % 500_000) as f64);
        }
    }
    panel
}

struct SyntheticPriceProvider;

#[async_trait::async_trait]
impl PriceDataProvider for SyntheticPriceProvider {
    async fn load(&self, symbols: &[String], start: NaiveDate, end: NaiveDate, _fields: Option<&[String]>) -> Result<Panel, Error> {
        Ok(synthetic_quote_panel(symbols, start, end))
    }
}

struct SyntheticFundamentalProvider;

#[async_trait::async_trait]
impl FundamentalDataProvider for SyntheticFundamentalProvider {
    async fn load(&self, symbols: &[String], _attributes: Option<&[String]>) -> Result<BTreeMap<String, BTreeMap<String, f64>>, Error> {
        let mut out = BTreeMap::new();
        for symbol in symbols {
            let seed: u64 = symbol.bytes().fold(1469598103934665603u64, |acc, b| (acc ^ b as u64).wrapping_mul(1099511628211));
            let mut row = BTreeMap::new();
            row.insert("inc_eps_basic".to_string(), 0.1 + (seed % 500) as f64 / 100.0);
            out.insert(symbol.clone(), row);
        }
        Ok(out)
    }
}

/// Populates the demo catalog/company tables with deterministic synthetic
/// fundamentals, used only by `--dynamic-universe`.
async fn seed_dynamic_universe_tables(catalog: &CatalogService, company: &CompanyService, symbols: &[String]) -> Result<(), Error> {
    let entries: Vec<CatalogEntry> = symbols
        .iter()
        .map(|s| CatalogEntry { symbol: s.clone(), name: format!("{s} Inc."), exchange: "DEMO".into(), asset_type: AssetType::Stock, market: "US".into(), status: CatalogStatus::Active })
        .collect();
    catalog.upsert_catalog(&entries).await?;

    for symbol in symbols {
        let seed: u64 = symbol.bytes().fold(1469598103934665603u64, |acc, b| (acc ^ b as u64).wrapping_mul(1099511628211));
        let mut metrics = BTreeMap::new();
        metrics.insert("market_cap".to_string(), Decimal::from((seed % 20) * 1_000_000_000));
        metrics.insert("pe_ttm".to_string(), Decimal::new(10 + (seed % 40) as i64, 0));
        metrics.insert("roe_ttm".to_string(), Decimal::new(5 + (seed % 25) as i64, 2));
        company.put_company(&Company { symbol: symbol.clone(), score: (seed % 100) as f64, metrics }).await?;
    }
    Ok(())
}

fn build_thresholds(cli: &Cli) -> UniverseThresholds {
    UniverseThresholds {
        market_cap_min: cli.filter_market_cap_min,
        pe_max: cli.filter_pe_max,
        eps_growth_min: cli.filter_eps_growth_min,
        roe_min: cli.filter_roe_min,
        revenue_growth_min: cli.filter_revenue_growth_min,
        beta_min: cli.filter_beta_min,
        beta_max: cli.filter_beta_max,
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = BacktestConfig {
        start_date: cli.start_date,
        end_date: cli.end_date,
        initial_capital: cli.initial_capital,
        rebalance_frequency: cli.rebalance.clone(),
        max_positions: cli.max_positions,
        price_field: cli.price_field.clone(),
        fallback_price_field: cli.fallback_price_field.clone(),
        ..Default::default()
    };

    let repo = Arc::new(InMemoryRepository::new());
    let catalog = CatalogService::new(repo.clone());
    let company = CompanyService::new(repo.clone());

    let universe = match explicit_universe(&cli)? {
        Some(symbols) => Some(symbols),
        None if cli.dynamic_universe => {
            let default_universe: Vec<String> = vec!["AAA".into(), "BBB".into(), "CCC".into(), "DDD".into(), "EEE".into()];
            seed_dynamic_universe_tables(&catalog, &company, &default_universe).await?;
            let selector = UniverseSelector::new(catalog, company, build_thresholds(&cli), MissingMetricMode::Permissive, cli.max_positions);
            let (selected, _trace) = selector.select(AssetType::Stock, "US").await?;
            Some(selected)
        }
        None => None,
    };

    let engine = BacktestEngine::new(config, Arc::new(SyntheticPriceProvider), Some(Arc::new(SyntheticFundamentalProvider)), None)?;

    let mut strategy: Box<dyn quant_core::backtest::strategy::Strategy> = match cli.strategy.as_str() {
        "red-line" => Box::new(RedLineStrategy { max_positions: cli.max_positions, ..Default::default() }),
        _ => Box::new(LowPeMomentumStrategy { max_assets: cli.max_positions, ..Default::default() }),
    };

    let result = engine.run(strategy.as_mut(), universe.as_deref()).await?;

    std::fs::create_dir_all(&cli.output_dir).map_err(|e| quant_core::error::InvalidInputError::Config(e.to_string()))?;
    write_outputs(&cli.output_dir, &result)?;

    tracing::info!(
        total_return = result.total_return,
        sharpe_ratio = result.sharpe_ratio,
        max_drawdown = result.max_drawdown,
        num_trades = result.num_trades,
        "backtest complete"
    );
    Ok(())
}

fn write_outputs(output_dir: &std::path::Path, result: &quant_core::backtest::result::BacktestResult) -> Result<(), Error> {
    let summary = serde_json::json!({
        "total_return": result.total_return,
        "annualized_return": result.annualized_return,
        "max_drawdown": result.max_drawdown,
        "volatility": result.volatility,
        "sharpe_ratio": result.sharpe_ratio,
        "win_rate": result.win_rate,
        "num_trades": result.num_trades,
        "gross_profit": result.gross_profit,
        "gross_loss": result.gross_loss,
        "ending_cash": result.ending_cash,
    });
    let summary_path = output_dir.join("summary.json");
    std::fs::write(&summary_path, serde_json::to_vec_pretty(&summary).unwrap_or_default()).map_err(|e| quant_core::error::InvalidInputError::Config(e.to_string()))?;

    let mut equity_csv = String::from("date,equity\n");
    for (date, value) in &result.equity_curve {
        equity_csv.push_str(&format!("{date},{value}\n"));
    }
    std::fs::write(output_dir.join("equity_curve.csv"), equity_csv).map_err(|e| quant_core::error::InvalidInputError::Config(e.to_string()))?;

    let mut trades_csv = String::from("symbol,entry_date,exit_date,quantity,entry_price,exit_price,profit,return_pct\n");
    for trade in &result.trades {
        trades_csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            trade.symbol, trade.entry_date, trade.exit_date, trade.quantity, trade.entry_price, trade.exit_price, trade.profit, trade.return_pct
        ));
    }
    std::fs::write(output_dir.join("trades.csv"), trades_csv).map_err(|e| quant_core::error::InvalidInputError::Config(e.to_string()))?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        tracing::error!(error = %err, "backtest run failed");
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}
