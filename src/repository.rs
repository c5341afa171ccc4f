//! Key/index-addressed document store abstraction (spec §4.2, §6). This
//! crate treats the physical engine as an external collaborator; only the
//! contract is specified here, plus an in-memory reference implementation
//! used by tests and the CLI's local demo mode.

pub mod memory;

use crate::error::RepositoryError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A single stored attribute value. Numeric attributes use exact decimal,
/// never binary float, per spec §3 invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    S(String),
    N(Decimal),
    I(i64),
    Bool(bool),
    Null,
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            AttrValue::N(d) => Some(*d),
            AttrValue::I(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::I(i) => Some(*i),
            AttrValue::N(d) => (*d).try_into().ok(),
            _ => None,
        }
    }
}

/// A stored item, keyed by attribute name. `pk`/`sk` and any GSI keys are
/// ordinary attributes alongside the domain payload, matching the
/// single-table design of spec §3.
pub type Item = BTreeMap<String, AttrValue>;

pub fn get_pk(item: &Item) -> Option<&str> {
    item.get("pk").and_then(AttrValue::as_str)
}

pub fn get_sk(item: &Item) -> Option<&str> {
    item.get("sk").and_then(AttrValue::as_str)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Which secondary index to query — the three the store exposes per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexName {
    BySymbol,
    ByMarketStatus,
    ByScore,
}

/// One page of a `query_by_index` scan. The repository itself follows
/// continuation tokens transparently until `limit` is reached or the
/// index is exhausted, so callers never see `LastEvaluatedKey`-style
/// tokens directly.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
}

/// Minimal CRUD + paginated prefix queries + batched writes against a
/// keyed store (spec §4.2).
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn put_item(&self, item: Item) -> Result<(), RepositoryError>;

    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, RepositoryError>;

    async fn delete_item(&self, pk: &str, sk: &str) -> Result<(), RepositoryError>;

    /// Applies `patch` to the attributes of an existing item, leaving
    /// attributes not named in `patch` untouched. Used sparingly — most
    /// writes are full-item `put_item` upserts (spec §4.2, §6) — but
    /// required for partial updates such as catalog status transitions
    /// that must not clobber unrelated fields written by another writer.
    async fn update_item(&self, pk: &str, sk: &str, patch: BTreeMap<String, AttrValue>) -> Result<(), RepositoryError>;

    /// Query a secondary index by partition value, optionally restricted to
    /// sort keys with the given prefix, up to `limit` items, in the
    /// requested scan direction. Transparently follows continuation pages.
    async fn query_by_index(
        &self,
        index: IndexName,
        partition_value: &str,
        sort_prefix: Option<&str>,
        limit: Option<usize>,
        direction: ScanDirection,
    ) -> Result<QueryPage, RepositoryError>;

    /// Full-table scan fallback, used when a secondary index is
    /// unavailable for a given filter combination.
    async fn scan(
        &self,
        filter: &(dyn for<'r> Fn(&'r Item) -> bool + Sync),
        limit: Option<usize>,
    ) -> Result<QueryPage, RepositoryError>;

    /// De-duplicates by `(pk, sk)` within the batch, respects the store's
    /// batch size, and retries unprocessed items with exponential backoff
    /// + jitter (spec §4.2).
    async fn batch_put(&self, items: Vec<Item>) -> Result<(), RepositoryError>;
}

/// De-duplicate a batch of items by `(pk, sk)`, keeping the last
/// occurrence — this is the deterministic last-writer-wins semantic
/// required by spec §5 "Ordering guarantees".
pub fn dedup_by_key(items: Vec<Item>) -> Vec<Item> {
    let mut by_key: BTreeMap<(String, String), Item> = BTreeMap::new();
    for item in items {
        let key = (
            get_pk(&item).unwrap_or_default().to_string(),
            get_sk(&item).unwrap_or_default().to_string(),
        );
        by_key.insert(key, item);
    }
    by_key.into_values().collect()
}

/// Exponential backoff + jitter delay for the `attempt`'th retry
/// (1-indexed), shared by the repository batch-put retry loop and the
/// provider adapter retry loop (spec §4.2, §4.3).
pub fn backoff_delay(attempt: u32, base: std::time::Duration) -> std::time::Duration {
    use rand::Rng;
    let exp = base.mul_f64(2f64.powi(attempt.saturating_sub(1) as i32));
    let jitter_ms = rand::rng().random_range(0..=(base.as_millis() as u64).max(1));
    exp + std::time::Duration::from_millis(jitter_ms)
}
