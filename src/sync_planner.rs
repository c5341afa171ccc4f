//! Sync planner: computes per-symbol fetch windows from the latest stored
//! date, calendar, and backfill policy (spec §4.7). Grounded in
//! `core/data_collector/stock/sync.py`'s `build_cn_sync_plans` /
//! `compute_backfill_start`.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub symbol: String,
    pub start: NaiveDate,
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    pub full_backfill_years: i32,
    pub initial_only: bool,
    pub catch_up_max_days: Option<i64>,
    pub catch_up_max_years: Option<i32>,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self { full_backfill_years: 0, initial_only: false, catch_up_max_days: None, catch_up_max_years: None }
    }
}

fn subtract_years(date: NaiveDate, years: i32) -> NaiveDate {
    date.with_year(date.year() - years).unwrap_or_else(|| {
        // Feb 29 on a non-leap target year: fall back to a fixed day offset.
        date - chrono::Duration::days(365 * years as i64)
    })
}

/// `latest = None` -> `today - full_backfill_years` (or `today` when
/// years = 0). Otherwise -> `latest + 1 day`.
pub fn compute_backfill_start(today: NaiveDate, latest: Option<NaiveDate>, full_backfill_years: i32) -> NaiveDate {
    match latest {
        None => {
            if full_backfill_years > 0 {
                subtract_years(today, full_backfill_years)
            } else {
                today
            }
        }
        Some(latest) => latest + chrono::Duration::days(1),
    }
}

/// Computes per-symbol fetch plans. `latest_dates` supplies the latest
/// stored date per symbol (absent entries are treated as `None`).
pub fn build_plans(
    symbols: &[String],
    latest: impl Fn(&str) -> Option<NaiveDate>,
    last_trading_day: NaiveDate,
    today: NaiveDate,
    options: PlannerOptions,
) -> Vec<SyncPlan> {
    let mut plans = Vec::new();
    for symbol in symbols {
        let latest_date = latest(symbol);

        if options.initial_only && latest_date.is_some() {
            continue;
        }
        if let Some(latest_date) = latest_date {
            if latest_date >= last_trading_day {
                continue;
            }
        }

        let mut start = compute_backfill_start(today, latest_date, options.full_backfill_years);

        if let Some(max_days) = options.catch_up_max_days {
            start = start.max(today - chrono::Duration::days(max_days));
        }
        if let Some(max_years) = options.catch_up_max_years {
            start = start.max(subtract_years(today, max_years));
        }

        if start <= today {
            plans.push(SyncPlan { symbol: symbol.clone(), start });
        }
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn already_up_to_date_yields_no_plans() {
        let today = d(2025, 9, 14);
        let plans = build_plans(
            &["X".into()],
            |_| Some(today),
            today,
            today,
            PlannerOptions::default(),
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn initial_only_skips_symbols_with_history() {
        let today = d(2025, 9, 14);
        let opts = PlannerOptions { initial_only: true, ..Default::default() };
        let plans = build_plans(&["X".into()], |_| Some(d(2025, 1, 1)), d(2025, 9, 12), today, opts);
        assert!(plans.is_empty());
    }

    #[test]
    fn zero_year_backfill_with_no_history_starts_today() {
        let today = d(2025, 9, 14);
        assert_eq!(compute_backfill_start(today, None, 0), today);
    }

    #[test]
    fn resumes_from_day_after_latest_stored_date() {
        let today = d(2025, 9, 14);
        let last_trading_day = d(2025, 9, 12);
        let plans = build_plans(
            &["X".into()],
            |_| Some(d(2025, 9, 10)),
            last_trading_day,
            today,
            PlannerOptions::default(),
        );
        assert_eq!(plans, vec![SyncPlan { symbol: "X".into(), start: d(2025, 9, 11) }]);
    }

    #[test]
    fn catch_up_max_days_bounds_the_start() {
        let today = d(2025, 9, 14);
        let opts = PlannerOptions { catch_up_max_days: Some(5), ..Default::default() };
        let plans = build_plans(&["X".into()], |_| None, d(2020, 1, 1), today, opts);
        assert_eq!(plans[0].start, today - chrono::Duration::days(5));
    }
}
