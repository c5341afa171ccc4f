//! Ingestion orchestrator: deterministic symbol sharding, a leaky-bucket
//! rate limiter, and a bounded worker pool that drives per-symbol sync
//! plans to completion (spec §4.9). Grounded in
//! `functions/python/sync_cn_stocks.py`'s `ThreadPoolExecutor` + MD5
//! sharding + jitter pattern.

use crate::providers::{row_to_quote, RawQuoteProvider};
use crate::quote::QuoteService;
use crate::sync_planner::SyncPlan;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use chrono::NaiveDate;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_ERROR_SAMPLES: usize = 10;

/// `md5(uppercase(symbol)) mod shard_total == shard_index` (spec §4.9).
/// Deterministic across language/process boundaries by construction.
pub fn shard_of(symbol: &str, shard_total: u32) -> u32 {
    if shard_total <= 1 {
        return 0;
    }
    let digest = Md5::digest(symbol.trim().to_uppercase().as_bytes());
    let mut value: u128 = 0;
    for byte in digest {
        value = (value << 8) | byte as u128;
    }
    (value % shard_total as u128) as u32
}

pub fn belongs_to_shard(symbol: &str, shard_total: u32, shard_index: u32) -> bool {
    shard_total <= 1 || shard_of(symbol, shard_total) == shard_index
}

/// A global leaky-bucket rate limiter: callers block until at least
/// `1 / rps` seconds have elapsed since the last permit was granted.
/// Shared across the worker pool via a mutex-guarded monotonic timestamp
/// rather than a token-bucket counter (spec §4.9's "global leaky-bucket").
pub struct RateLimiter {
    min_interval: Duration,
    last_issued: Mutex<Instant>,
}

/// Per-fetch jitter window added on top of the leaky-bucket interval
/// (spec §4.9: "a small randomized jitter is added per fetch"), grounded in
/// `sync_cn_stocks.py`'s `time.sleep(random.uniform(0.05, 0.25))` between
/// requests. Distinct from `repository::backoff_delay`'s retry jitter.
const JITTER_RANGE: std::ops::Range<u64> = 50..250;

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self { min_interval, last_issued: Mutex::new(Instant::now() - min_interval) }
    }

    /// Blocks (async-sleeps) until a permit is available, then issues it.
    /// Every permit carries a small randomized jitter on top of the bucket
    /// interval so concurrent workers don't fetch in perfect lockstep.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last_issued = self.last_issued.lock();
                let now = Instant::now();
                let earliest = *last_issued + self.min_interval;
                if now >= earliest {
                    *last_issued = now;
                    None
                } else {
                    Some(earliest - now)
                }
            };
            match wait {
                None => break,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
        let jitter_ms = rand::rng().random_range(JITTER_RANGE);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }
}

/// Outcome of processing a single symbol's sync plan.
#[derive(Debug, Clone)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub ingested_rows: usize,
    pub error: Option<String>,
}

/// Aggregate counters plus a capped sample of recent errors, surfaced to
/// operators without unbounded memory growth (spec §4.9, §7).
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_rows: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    error_samples: Mutex<Vec<String>>,
}

impl RunSummary {
    fn record(&self, outcome: &SymbolOutcome) {
        self.total_rows.fetch_add(outcome.ingested_rows as u64, Ordering::Relaxed);
        match &outcome.error {
            None => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(message) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let mut samples = self.error_samples.lock();
                if samples.len() < MAX_ERROR_SAMPLES {
                    samples.push(format!("{}: {}", outcome.symbol, message));
                }
            }
        }
    }

    pub fn error_samples(&self) -> Vec<String> {
        self.error_samples.lock().clone()
    }
}

/// Drives `plans` through `process_one` with bounded concurrency
/// (`max_concurrency` tokio tasks) and a shared [`RateLimiter`], collecting
/// per-symbol outcomes into a [`RunSummary`]. `process_one` owns retry and
/// fallback-source handling internally (see `providers::retry_fetch`).
pub async fn run_sync<F, Fut>(plans: Vec<SyncPlan>, max_concurrency: usize, upstream_rps: f64, process_one: F) -> Arc<RunSummary>
where
    F: Fn(SyncPlan) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = SymbolOutcome> + Send,
{
    let summary = Arc::new(RunSummary::default());
    let limiter = Arc::new(RateLimiter::new(upstream_rps));
    let process_one = Arc::new(process_one);

    let mut pending = plans.into_iter();
    let mut in_flight: Vec<tokio::task::JoinHandle<SymbolOutcome>> = Vec::new();

    loop {
        while in_flight.len() < max_concurrency.max(1) {
            let Some(plan) = pending.next() else { break };
            let limiter = Arc::clone(&limiter);
            let process_one = Arc::clone(&process_one);
            in_flight.push(tokio::spawn(async move {
                limiter.acquire().await;
                process_one(plan).await
            }));
        }
        if in_flight.is_empty() {
            break;
        }

        let handle = in_flight.remove(0);
        match handle.await {
            Ok(outcome) => summary.record(&outcome),
            Err(join_error) => {
                tracing::error!(error = %join_error, "sync task panicked");
                summary.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    summary
}

/// The production per-symbol worker: fetches `plan.symbol`'s rows from
/// `provider` (which owns its own fallback-source chain and retry, see
/// `providers::equity::EquityProvider`/`providers::index::IndexProvider`),
/// converts them to `quote::Quote`s, and upserts them through
/// `quote_service`. This is the "executes the provider chain, upserts to
/// the quote service" worker spec §4.9 describes.
pub async fn sync_symbol(plan: &SyncPlan, today: NaiveDate, provider: &dyn RawQuoteProvider, quote_service: &QuoteService) -> SymbolOutcome {
    let rows = provider.fetch_rows(&plan.symbol, plan.start, today).await;
    if rows.is_empty() {
        return SymbolOutcome { symbol: plan.symbol.clone(), ingested_rows: 0, error: Some("no data returned by any source".into()) };
    }
    let quotes: Vec<_> = rows.iter().map(|row| row_to_quote(&plan.symbol, row)).collect();
    match quote_service.upsert_quotes(&quotes).await {
        Ok(ingested_rows) => SymbolOutcome { symbol: plan.symbol.clone(), ingested_rows, error: None },
        Err(err) => SymbolOutcome { symbol: plan.symbol.clone(), ingested_rows: 0, error: Some(err.to_string()) },
    }
}

/// Drives `plans` through [`sync_symbol`] with the bounded, rate-limited
/// worker pool from [`run_sync`] — the concrete ingestion pipeline wiring
/// a deployment runs, as opposed to `run_sync`'s caller-supplied closure
/// used directly by tests that stub out the provider chain.
pub async fn run_quote_sync(
    plans: Vec<SyncPlan>,
    max_concurrency: usize,
    upstream_rps: f64,
    today: NaiveDate,
    provider: Arc<dyn RawQuoteProvider>,
    quote_service: Arc<QuoteService>,
) -> Arc<RunSummary> {
    run_sync(plans, max_concurrency, upstream_rps, move |plan| {
        let provider = Arc::clone(&provider);
        let quote_service = Arc::clone(&quote_service);
        async move { sync_symbol(&plan, today, provider.as_ref(), quote_service.as_ref()).await }
    })
    .await
}

/// Gates whether "today" should be fetched at all: both the market must
/// presently be a trading day AND a market-specific sentinel symbol must
/// already carry today's row upstream, otherwise today is skipped while
/// backfill of earlier gaps still proceeds (spec §4.8, grounded in
/// `sync_cn_stocks.py`'s `initial_only=not is_trading_day(...)`).
pub fn is_today_fetch_enabled(today_is_trading_day: bool, sentinel_has_today: bool) -> bool {
    today_is_trading_day && sentinel_has_today
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_assignment_is_deterministic_and_case_insensitive() {
        let a = shard_of("aapl", 4);
        let b = shard_of("AAPL", 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn single_shard_total_always_belongs() {
        assert!(belongs_to_shard("AAPL", 1, 0));
        assert!(belongs_to_shard("AAPL", 0, 0));
    }

    #[test]
    fn shard_partitions_symbols_across_all_indices() {
        let symbols: Vec<String> = (0..200).map(|i| format!("SYM{i}")).collect();
        let shard_total = 4;
        let mut counts = [0u32; 4];
        for s in &symbols {
            counts[shard_of(s, shard_total) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0));
        assert_eq!(counts.iter().sum::<u32>(), 200);
    }

    #[tokio::test]
    async fn run_sync_processes_all_plans_and_records_errors() {
        let plans = vec![
            SyncPlan { symbol: "OK".into(), start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() },
            SyncPlan { symbol: "FAIL".into(), start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() },
        ];
        let summary = run_sync(plans, 2, 1000.0, |plan| async move {
            if plan.symbol == "FAIL" {
                SymbolOutcome { symbol: plan.symbol, ingested_rows: 0, error: Some("boom".into()) }
            } else {
                SymbolOutcome { symbol: plan.symbol, ingested_rows: 5, error: None }
            }
        })
        .await;
        assert_eq!(summary.total_rows.load(Ordering::Relaxed), 5);
        assert_eq!(summary.succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(summary.failed.load(Ordering::Relaxed), 1);
        assert_eq!(summary.error_samples(), vec!["FAIL: boom".to_string()]);
    }

    struct StubProvider;

    #[async_trait::async_trait]
    impl RawQuoteProvider for StubProvider {
        async fn fetch_rows(&self, symbol: &str, start: NaiveDate, _end: NaiveDate) -> Vec<crate::providers::RawQuoteRow> {
            if symbol == "EMPTY" {
                return Vec::new();
            }
            vec![crate::providers::RawQuoteRow {
                date: start,
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                adj_close: Some(10.5),
                volume: Some(1000.0),
                turnover_amount: Some(10500.0),
                turnover_rate: Some(0.01),
                adj_factor: Some(1.0),
                vwap: Some(10.5),
                currency: Some("USD".into()),
                source: "stub".into(),
            }]
        }
    }

    #[tokio::test]
    async fn run_quote_sync_persists_rows_through_the_quote_service() {
        use crate::repository::memory::InMemoryRepository;

        let quote_service = Arc::new(QuoteService::new(Arc::new(InMemoryRepository::new())));
        let plans = vec![
            SyncPlan { symbol: "AAA".into(), start: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap() },
            SyncPlan { symbol: "EMPTY".into(), start: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap() },
        ];
        let today = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let summary = run_quote_sync(plans, 2, 1000.0, today, Arc::new(StubProvider), Arc::clone(&quote_service)).await;

        assert_eq!(summary.succeeded.load(Ordering::Relaxed), 1);
        assert_eq!(summary.failed.load(Ordering::Relaxed), 1);
        let stored = quote_service.get_quotes("AAA", None, None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].vwap, Some(rust_decimal::Decimal::try_from(10.5).unwrap()));
    }
}
