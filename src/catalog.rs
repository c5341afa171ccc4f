//! Catalog service: upsert and query the tradable-asset catalog by
//! `(asset_type, market, status)` (spec §4.4).

use crate::error::{InvalidInputError, RepositoryError};
use crate::key_codec;
use crate::repository::{AttrValue, IndexName, Item, Repository, ScanDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum AssetType {
    Stock,
    Index,
    Etf,
    Commodity,
    Fx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum CatalogStatus {
    Active,
    Deactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub asset_type: AssetType,
    pub market: String,
    pub status: CatalogStatus,
}

impl CatalogEntry {
    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("pk".into(), AttrValue::S(key_codec::pk_stock(&self.symbol)));
        item.insert("sk".into(), AttrValue::S(key_codec::sk_meta("CATALOG", None)));
        item.insert("gsi1pk".into(), AttrValue::S(key_codec::gsi1pk_symbol(&self.symbol)));
        item.insert("gsi1sk".into(), AttrValue::S(key_codec::gsi1sk_entity("CATALOG", None)));
        item.insert(
            "gsi2pk".into(),
            AttrValue::S(key_codec::gsi2pk_market_status(&self.market, &self.status.to_string())),
        );
        item.insert("gsi2sk".into(), AttrValue::S(key_codec::gsi2sk_entity("CATALOG", None)));
        item.insert("symbol".into(), AttrValue::S(self.symbol.clone()));
        item.insert("name".into(), AttrValue::S(self.name.clone()));
        item.insert("exchange".into(), AttrValue::S(self.exchange.clone()));
        item.insert("asset_type".into(), AttrValue::S(self.asset_type.to_string()));
        item.insert("market".into(), AttrValue::S(self.market.clone()));
        item.insert("status".into(), AttrValue::S(self.status.to_string()));
        item
    }

    fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            symbol: item.get("symbol")?.as_str()?.to_string(),
            name: item.get("name")?.as_str()?.to_string(),
            exchange: item.get("exchange")?.as_str()?.to_string(),
            asset_type: item.get("asset_type")?.as_str()?.parse().ok()?,
            market: item.get("market")?.as_str()?.to_string(),
            status: item.get("status")?.as_str()?.parse().ok()?,
        })
    }
}

pub struct CatalogService {
    repo: Arc<dyn Repository>,
}

impl CatalogService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Validates required columns, builds primary + both secondary keys,
    /// and batch-puts the rows.
    pub async fn upsert_catalog(&self, rows: &[CatalogEntry]) -> Result<usize, crate::error::Error> {
        if rows.is_empty() {
            return Ok(0);
        }
        let items: Vec<Item> = rows.iter().map(CatalogEntry::to_item).collect();
        self.repo.batch_put(items).await.map_err(RepositoryError::from)?;
        Ok(rows.len())
    }

    /// Queries `byMarketStatus` by `(market, status)` prefix `ENTITY#CATALOG`,
    /// then filters by `asset_type` in memory — keeps index cardinality low
    /// since `asset_type` has few distinct values (spec §4.4 rationale).
    pub async fn query_catalog(
        &self,
        asset_type: AssetType,
        market: &str,
        status: CatalogStatus,
        limit: Option<usize>,
    ) -> Result<Vec<CatalogEntry>, crate::error::Error> {
        let pk = key_codec::gsi2pk_market_status(market, &status.to_string());
        let page = self
            .repo
            .query_by_index(IndexName::ByMarketStatus, &pk, Some("ENTITY#CATALOG"), limit.map(|l| l * 4), ScanDirection::Forward)
            .await
            .map_err(RepositoryError::from)?;

        let mut entries: Vec<CatalogEntry> = page
            .items
            .iter()
            .filter_map(CatalogEntry::from_item)
            .filter(|e| e.asset_type == asset_type)
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Full-table scan fallback used when a secondary index is unavailable,
    /// paginated up to an upper bound (spec §4.4).
    pub async fn scan_catalog(
        &self,
        asset_type: Option<AssetType>,
        market: Option<&str>,
        status: Option<CatalogStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<CatalogEntry>, crate::error::Error> {
        let market = market.map(|m| m.to_string());
        let filter = move |item: &Item| {
            if let Some(at) = asset_type {
                if item.get("asset_type").and_then(AttrValue::as_str) != Some(&at.to_string()) {
                    return false;
                }
            }
            if let Some(ref m) = market {
                if item.get("market").and_then(AttrValue::as_str) != Some(m) {
                    return false;
                }
            }
            if let Some(st) = status {
                if item.get("status").and_then(AttrValue::as_str) != Some(&st.to_string()) {
                    return false;
                }
            }
            item.get("sk").and_then(AttrValue::as_str) == Some("META#CATALOG")
        };
        let page = self.repo.scan(&filter, limit).await.map_err(RepositoryError::from)?;
        Ok(page.items.iter().filter_map(CatalogEntry::from_item).collect())
    }

    pub fn validate_rows(rows: &[CatalogEntry]) -> Result<(), InvalidInputError> {
        for row in rows {
            if row.symbol.trim().is_empty() {
                return Err(InvalidInputError::MissingColumns(vec!["symbol"]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryRepository;

    fn sample(symbol: &str, market: &str, status: CatalogStatus) -> CatalogEntry {
        CatalogEntry {
            symbol: symbol.into(),
            name: format!("{symbol} Inc."),
            exchange: "NASDAQ".into(),
            asset_type: AssetType::Stock,
            market: market.into(),
            status,
        }
    }

    #[tokio::test]
    async fn upsert_then_query_by_market_status_filters_asset_type() {
        let repo = Arc::new(InMemoryRepository::new());
        let svc = CatalogService::new(repo);
        let rows = vec![sample("AAPL", "US", CatalogStatus::Active), sample("MSFT", "US", CatalogStatus::Active)];
        svc.upsert_catalog(&rows).await.unwrap();

        let found = svc.query_catalog(AssetType::Stock, "US", CatalogStatus::Active, None).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn scan_catalog_fallback_respects_filters() {
        let repo = Arc::new(InMemoryRepository::new());
        let svc = CatalogService::new(repo);
        svc.upsert_catalog(&[sample("AAPL", "US", CatalogStatus::Active), sample("SH600519", "CN", CatalogStatus::Active)])
            .await
            .unwrap();
        let found = svc.scan_catalog(None, Some("CN"), None, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "SH600519");
    }
}
