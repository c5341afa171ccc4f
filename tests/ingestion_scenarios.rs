//! Ingestion-side end-to-end scenarios (spec §8): planner resume combined
//! with the trading calendar, and fallback source ordering combined with
//! the sharded orchestrator.

use chrono::NaiveDate;
use quant_core::calendar::{TradingCalendar, WeekdayCalendar};
use quant_core::orchestrator::{run_sync, SymbolOutcome};
use quant_core::providers::{fetch_with_fallback, RawQuoteRow};
use quant_core::sync_planner::{build_plans, PlannerOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// A symbol with partial history (stored through a Friday) resumes from the
/// following Monday, using the real calendar's weekend-skip to establish
/// `last_trading_day`, rather than a hand-picked date.
#[test]
fn planner_resumes_after_partial_history_using_the_calendar() {
    let calendar = WeekdayCalendar;
    let today = d(2025, 9, 15); // Monday
    let last_trading_day = calendar.last_trading_day("US", today);
    assert_eq!(last_trading_day, today);

    let stored_through = d(2025, 9, 12); // prior Friday
    let plans = build_plans(&["AAA".to_string()], |_| Some(stored_through), last_trading_day, today, PlannerOptions::default());

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].start, d(2025, 9, 13)); // Saturday -- the planner doesn't skip weekends itself
}

/// A symbol already caught up through the last trading day produces no plan.
#[test]
fn planner_emits_nothing_for_a_symbol_already_caught_up() {
    let calendar = WeekdayCalendar;
    let today = d(2025, 9, 15);
    let last_trading_day = calendar.last_trading_day("US", today);
    let plans = build_plans(&["AAA".to_string()], |_| Some(last_trading_day), last_trading_day, today, PlannerOptions::default());
    assert!(plans.is_empty());
}

/// The orchestrator's worker pool drives each symbol's per-symbol fetch,
/// which internally honors a fallback source chain -- the two concerns
/// (bounded concurrency, fallback ordering) must compose correctly.
#[tokio::test]
async fn orchestrator_drives_fallback_fetches_across_many_symbols_concurrently() {
    let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let sources = vec!["flaky_primary".to_string(), "reliable_secondary".to_string()];
    let call_count = Arc::new(AtomicUsize::new(0));

    let plans: Vec<quant_core::sync_planner::SyncPlan> = symbols.iter().map(|s| quant_core::sync_planner::SyncPlan { symbol: s.clone(), start: d(2025, 1, 1) }).collect();

    let sources_for_closure = sources.clone();
    let call_count_for_closure = call_count.clone();
    let summary = run_sync(plans, 2, 1000.0, move |plan| {
        let sources = sources_for_closure.clone();
        let call_count = call_count_for_closure.clone();
        async move {
            call_count.fetch_add(1, Ordering::SeqCst);
            let rows = fetch_with_fallback(&plan.symbol, &sources, |source| async move {
                if source == "flaky_primary" {
                    Vec::new()
                } else {
                    vec![RawQuoteRow {
                        date: d(2025, 1, 2),
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        adj_close: None,
                        volume: None,
                        turnover_amount: None,
                        turnover_rate: None,
                        adj_factor: None,
                        vwap: None,
                        currency: None,
                        source,
                    }]
                }
            })
            .await;
            SymbolOutcome { symbol: plan.symbol.clone(), ingested_rows: rows.len(), error: if rows.is_empty() { Some("no data".into()) } else { None } }
        }
    })
    .await;

    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    assert_eq!(summary.succeeded.load(Ordering::SeqCst), 3);
    assert_eq!(summary.total_rows.load(Ordering::SeqCst), 3);
    assert_eq!(summary.failed.load(Ordering::SeqCst), 0);
}
