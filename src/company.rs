//! Company service: single-row-per-company snapshot with a score-ordered
//! index; batched multi-symbol reads (spec §4.6).

use crate::error::{InvalidInputError, RepositoryError};
use crate::key_codec;
use crate::repository::{AttrValue, IndexName, Item, Repository, ScanDirection};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

const BATCH_GET_CHUNK: usize = 100;

/// A company snapshot: required `symbol`/`score`, plus a sparse bag of
/// flattened fundamental metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub symbol: String,
    pub score: f64,
    pub metrics: BTreeMap<String, Decimal>,
}

impl Company {
    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttrValue::S(self.symbol.clone()));
        item.insert("sk".into(), AttrValue::S("META#COMPANY".into()));
        item.insert("gsi1pk".into(), AttrValue::S("SCORE".into()));
        item.insert("gsi1sk".into(), AttrValue::S(key_codec::score_sort_key(self.score, &self.symbol)));
        item.insert("symbol".into(), AttrValue::S(self.symbol.clone()));
        item.insert(
            "score".into(),
            AttrValue::N(Decimal::from_f64_retain(self.score).unwrap_or_default()),
        );
        for (k, v) in &self.metrics {
            item.insert(k.clone(), AttrValue::N(*v));
        }
        item
    }

    fn from_item(item: &Item) -> Option<Self> {
        let symbol = item.get("symbol").or_else(|| item.get("pk"))?.as_str()?.to_string();
        let score = item.get("score")?.as_decimal()?.to_f64()?;
        let skip = ["pk", "sk", "gsi1pk", "gsi1sk", "symbol", "score"];
        let metrics = item
            .iter()
            .filter(|(k, _)| !skip.contains(&k.as_str()))
            .filter_map(|(k, v)| v.as_decimal().map(|d| (k.clone(), d)))
            .collect();
        Some(Self { symbol, score, metrics })
    }
}

pub struct CompanyService {
    repo: Arc<dyn Repository>,
}

impl CompanyService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Requires `pk`, `score`, and index fields `(SCORE, <padded>#<sym>)`.
    pub async fn put_company(&self, company: &Company) -> Result<(), crate::error::Error> {
        if company.symbol.trim().is_empty() {
            return Err(InvalidInputError::MissingColumns(vec!["symbol"]).into());
        }
        if company.score < 0.0 {
            return Err(InvalidInputError::Config("score must be nonnegative".into()).into());
        }
        self.repo.put_item(company.to_item()).await.map_err(RepositoryError::from)?;
        Ok(())
    }

    pub async fn get_company(&self, symbol: &str) -> Result<Option<Company>, crate::error::Error> {
        let item = self.repo.get_item(symbol, "META#COMPANY").await.map_err(RepositoryError::from)?;
        Ok(item.as_ref().and_then(Company::from_item))
    }

    /// Uses the score index with a `>=` lexical comparison on the padded prefix.
    pub async fn query_by_score(&self, min_score: f64, limit: usize) -> Result<Vec<Company>, crate::error::Error> {
        let prefix = key_codec::score_prefix(min_score);
        // The in-memory store supports only exact-prefix matches, so we
        // query the whole SCORE partition and filter by `>=` on the sort
        // key in memory -- the lexical comparison is exactly the store's
        // native ordering per spec §8's padding invariant.
        let page = self
            .repo
            .query_by_index(IndexName::ByScore, "SCORE", None, None, ScanDirection::Forward)
            .await
            .map_err(RepositoryError::from)?;
        let mut companies: Vec<Company> = page
            .items
            .iter()
            .filter(|item| item.get("gsi1sk").and_then(AttrValue::as_str).is_some_and(|sk| sk >= prefix.as_str()))
            .filter_map(Company::from_item)
            .collect();
        companies.truncate(limit);
        Ok(companies)
    }

    /// De-duplicates symbols, chunks into groups of 100, and returns a
    /// mapping `symbol -> company`.
    pub async fn batch_get_companies(&self, symbols: &[String]) -> Result<BTreeMap<String, Company>, crate::error::Error> {
        let mut unique: Vec<String> = symbols.to_vec();
        unique.sort();
        unique.dedup();

        let mut out = BTreeMap::new();
        for chunk in unique.chunks(BATCH_GET_CHUNK) {
            for symbol in chunk {
                if let Some(company) = self.get_company(symbol).await? {
                    out.insert(symbol.clone(), company);
                }
            }
        }
        Ok(out)
    }
}
