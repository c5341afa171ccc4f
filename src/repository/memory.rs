//! Reference `Repository` implementation backed by an in-process table.
//! Stands in for the DynamoDB-shaped store spec §6 treats as external;
//! used by tests and the CLI's local demo mode.

use super::{backoff_delay, dedup_by_key, get_pk, get_sk, AttrValue, IndexName, Item, QueryPage, Repository, ScanDirection};
use crate::error::RepositoryError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

const BATCH_SIZE: usize = 25;
const MAX_RETRIES: u32 = 3;

#[derive(Default)]
pub struct InMemoryRepository {
    // primary table keyed by (pk, sk)
    table: RwLock<BTreeMap<(String, String), Item>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn gsi_key(item: &Item, pk_attr: &str, sk_attr: &str) -> Option<(String, String)> {
        let pk = item.get(pk_attr)?.as_str()?.to_string();
        let sk = item.get(sk_attr)?.as_str()?.to_string();
        Some((pk, sk))
    }
}

#[async_trait::async_trait]
impl Repository for InMemoryRepository {
    async fn put_item(&self, item: Item) -> Result<(), RepositoryError> {
        let pk = get_pk(&item).ok_or_else(|| RepositoryError::Validation("item missing pk".into()))?.to_string();
        let sk = get_sk(&item).ok_or_else(|| RepositoryError::Validation("item missing sk".into()))?.to_string();
        self.table.write().insert((pk, sk), item);
        Ok(())
    }

    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, RepositoryError> {
        Ok(self.table.read().get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> Result<(), RepositoryError> {
        self.table.write().remove(&(pk.to_string(), sk.to_string()));
        Ok(())
    }

    async fn update_item(&self, pk: &str, sk: &str, patch: BTreeMap<String, AttrValue>) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        let item = table
            .get_mut(&(pk.to_string(), sk.to_string()))
            .ok_or_else(|| RepositoryError::Validation(format!("update_item: no item at pk={pk} sk={sk}")))?;
        for (attr, value) in patch {
            item.insert(attr, value);
        }
        Ok(())
    }

    async fn query_by_index(
        &self,
        index: IndexName,
        partition_value: &str,
        sort_prefix: Option<&str>,
        limit: Option<usize>,
        direction: ScanDirection,
    ) -> Result<QueryPage, RepositoryError> {
        let (pk_attr, sk_attr) = match index {
            IndexName::BySymbol => ("gsi1pk", "gsi1sk"),
            IndexName::ByMarketStatus => ("gsi2pk", "gsi2sk"),
            IndexName::ByScore => ("gsi1pk", "gsi1sk"),
        };

        let table = self.table.read();
        let mut matched: Vec<(String, Item)> = table
            .values()
            .filter_map(|item| {
                let (pk, sk) = Self::gsi_key(item, pk_attr, sk_attr)?;
                if pk != partition_value {
                    return None;
                }
                if let Some(prefix) = sort_prefix {
                    if !sk.starts_with(prefix) {
                        return None;
                    }
                }
                Some((sk, item.clone()))
            })
            .collect();

        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if direction == ScanDirection::Backward {
            matched.reverse();
        }

        let mut items: Vec<Item> = matched.into_iter().map(|(_, item)| item).collect();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(QueryPage { items })
    }

    async fn scan(&self, filter: &(dyn for<'r> Fn(&'r Item) -> bool + Sync), limit: Option<usize>) -> Result<QueryPage, RepositoryError> {
        let snapshot: Vec<Item> = self.table.read().values().cloned().collect();
        let mut items: Vec<Item> = Vec::new();
        for it in snapshot {
            if filter(&it) {
                items.push(it);
            }
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(QueryPage { items })
    }

    async fn batch_put(&self, items: Vec<Item>) -> Result<(), RepositoryError> {
        let deduped = dedup_by_key(items);
        for chunk in deduped.chunks(BATCH_SIZE) {
            let mut pending: Vec<Item> = chunk.to_vec();
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let mut unprocessed = Vec::new();
                for item in pending.drain(..) {
                    match self.put_item(item.clone()).await {
                        Ok(()) => {}
                        Err(_) => unprocessed.push(item),
                    }
                }
                if unprocessed.is_empty() {
                    break;
                }
                if attempt >= MAX_RETRIES {
                    return Err(RepositoryError::Throttling(format!(
                        "{} items unprocessed after {} attempts",
                        unprocessed.len(),
                        attempt
                    )));
                }
                tokio::time::sleep(backoff_delay(attempt, Duration::from_millis(50))).await;
                pending = unprocessed;
            }
        }
        Ok(())
    }
}
