//! Centralized access to the environment-variable configuration surface
//! (spec §6). Keeping env reads in one place, with typed defaults, avoids
//! scattering `std::env::var` calls through the services.

use chrono::NaiveDate;
use std::env;

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Ingestion-side configuration resolved from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable non-core OHLCV columns on writes. Default off.
    pub write_extended_fields: bool,
    /// Average requests/second for the global upstream rate gate.
    pub upstream_rps: f64,
    /// Ordered comma-separated list of index-quote source keys.
    pub index_quote_sources: Vec<String>,
    pub shard_total: u32,
    pub shard_index: u32,
    pub max_concurrency: usize,
    pub full_backfill_years: i32,
    pub catch_up_max_days: Option<i64>,
    pub catch_up_max_years: Option<i32>,
    /// Freezes "today" for deterministic replays, if set.
    pub as_of_date: Option<NaiveDate>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let write_extended_fields = env::var("STOCKDATA_WRITE_EXTENDED_FIELDS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let index_quote_sources = env::var("INDEX_QUOTE_SOURCES")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["primary".to_string(), "fallback1".to_string(), "fallback2".to_string()]);

        let as_of_date = env::var("AS_OF_DATE")
            .ok()
            .and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok());

        let catch_up_max_days = env::var("CATCH_UP_MAX_DAYS").ok().and_then(|v| v.parse().ok());
        let catch_up_max_years = env::var("CATCH_UP_MAX_YEARS").ok().and_then(|v| v.parse().ok());

        Self {
            write_extended_fields,
            upstream_rps: parse_env("UPSTREAM_RPS", 2.0),
            index_quote_sources,
            shard_total: parse_env("SHARD_TOTAL", 1u32),
            shard_index: parse_env("SHARD_INDEX", 0u32),
            max_concurrency: parse_env("MAX_CONCURRENCY", 8usize),
            full_backfill_years: parse_env("FULL_BACKFILL_YEARS", 0i32),
            catch_up_max_days,
            catch_up_max_years,
            as_of_date,
        }
    }

    /// "Today" as seen by the ingestion subsystem, honoring `AS_OF_DATE`
    /// for deterministic replays.
    pub fn today(&self) -> NaiveDate {
        self.as_of_date.unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_when_unset() {
        let cfg = Config {
            write_extended_fields: false,
            upstream_rps: 2.0,
            index_quote_sources: vec!["primary".into(), "fallback1".into()],
            shard_total: 1,
            shard_index: 0,
            max_concurrency: 8,
            full_backfill_years: 0,
            catch_up_max_days: None,
            catch_up_max_years: None,
            as_of_date: None,
        };
        assert_eq!(cfg.shard_total, 1);
        assert!(!cfg.write_extended_fields);
    }
}
