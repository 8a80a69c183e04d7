//! In-memory single-table store.
//!
//! Backs standalone mode and tests. Writes are serialized behind one lock so
//! conditional puts and `ADD` updates are atomic, matching the guarantees the
//! DynamoDB backend gets from the service.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    Condition, Cursor, Item, Key, Page, Query, QueryTarget, Result, StorageError, Store, Update,
};

/// Items returned per page when no limit is given.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory store keyed by `(pk, sk)`.
pub struct MemoryStore {
    items: RwLock<BTreeMap<Key, Item>>,
    page_size: usize,
    fail_on_put: RwLock<bool>,
    fail_on_get: RwLock<bool>,
    fail_on_query: RwLock<bool>,
    fail_on_update: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
    fail_update_partitions: RwLock<HashSet<String>>,
    flaky_update_partitions: RwLock<HashMap<String, usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that pages query results at `page_size` items.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            fail_on_put: RwLock::new(false),
            fail_on_get: RwLock::new(false),
            fail_on_query: RwLock::new(false),
            fail_on_update: RwLock::new(false),
            fail_on_delete: RwLock::new(false),
            fail_update_partitions: RwLock::new(HashSet::new()),
            flaky_update_partitions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_query(&self, fail: bool) {
        *self.fail_on_query.write().await = fail;
    }

    pub async fn set_fail_on_update(&self, fail: bool) {
        *self.fail_on_update.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    /// Make updates to one partition fail with a transient error.
    pub async fn fail_updates_for(&self, partition: impl Into<String>) {
        self.fail_update_partitions
            .write()
            .await
            .insert(partition.into());
    }

    /// Make the next `times` updates to one partition fail with a transient error.
    pub async fn fail_updates_for_times(&self, partition: impl Into<String>, times: usize) {
        self.flaky_update_partitions
            .write()
            .await
            .insert(partition.into(), times);
    }

    /// Number of stored items.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    async fn check(flag: &RwLock<bool>, op: &str) -> Result<()> {
        if *flag.read().await {
            return Err(StorageError::Transient(format!("simulated {} failure", op)));
        }
        Ok(())
    }
}

/// Position of an item within the target's sort order.
fn position(item: &Item, target: QueryTarget) -> Option<(String, Key)> {
    match target {
        QueryTarget::Table => Some((item.key.sk.clone(), item.key.clone())),
        QueryTarget::Index => item
            .index_key
            .as_ref()
            .map(|index| (index.sk.clone(), item.key.clone())),
    }
}

fn cursor_position(cursor: &Cursor, target: QueryTarget) -> Option<(String, Key)> {
    match target {
        QueryTarget::Table => Some((cursor.key.sk.clone(), cursor.key.clone())),
        QueryTarget::Index => cursor
            .index_key
            .as_ref()
            .map(|index| (index.sk.clone(), cursor.key.clone())),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, item: Item, condition: Option<Condition>) -> Result<()> {
        Self::check(&self.fail_on_put, "put").await?;

        let mut items = self.items.write().await;
        if let Some(condition) = condition {
            if !condition.evaluate(items.get(&item.key)) {
                return Err(StorageError::conflict(&item.key));
            }
        }
        debug!(pk = %item.key.pk, sk = %item.key.sk, "put item");
        items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<Item>> {
        Self::check(&self.fail_on_get, "get").await?;
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn query(&self, query: Query) -> Result<Page> {
        Self::check(&self.fail_on_query, "query").await?;

        let items = self.items.read().await;
        let after = query
            .start
            .as_ref()
            .and_then(|cursor| cursor_position(cursor, query.target));

        let mut matching: Vec<((String, Key), &Item)> = items
            .values()
            .filter_map(|item| {
                let partition = match query.target {
                    QueryTarget::Table => Some(&item.key.pk),
                    QueryTarget::Index => item.index_key.as_ref().map(|k| &k.pk),
                }?;
                if *partition != query.partition {
                    return None;
                }
                let pos = position(item, query.target)?;
                if !query.sort.matches(&pos.0) {
                    return None;
                }
                if let Some(after) = &after {
                    if pos <= *after {
                        return None;
                    }
                }
                Some((pos, item))
            })
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let page_size = query
            .limit
            .map_or(self.page_size, |limit| limit.min(self.page_size))
            .max(1);
        let more = matching.len() > page_size;
        matching.truncate(page_size);

        let page_items: Vec<Item> = matching.into_iter().map(|(_, item)| item.clone()).collect();
        let next = if more {
            page_items.last().map(|last| Cursor {
                key: last.key.clone(),
                index_key: last.index_key.clone(),
            })
        } else {
            None
        };

        Ok(Page {
            items: page_items,
            next,
        })
    }

    async fn update(&self, key: &Key, update: Update) -> Result<Item> {
        Self::check(&self.fail_on_update, "update").await?;
        if self.fail_update_partitions.read().await.contains(&key.pk) {
            return Err(StorageError::Transient(format!(
                "simulated update failure for {}",
                key.pk
            )));
        }
        if let Some(remaining) = self.flaky_update_partitions.write().await.get_mut(&key.pk) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Transient(format!(
                    "simulated update failure for {}",
                    key.pk
                )));
            }
        }

        let mut items = self.items.write().await;
        let updated = update.apply(key, items.get(key))?;
        items.insert(key.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &Key, condition: Option<Condition>) -> Result<()> {
        Self::check(&self.fail_on_delete, "delete").await?;

        let mut items = self.items.write().await;
        if let Some(condition) = condition {
            if !condition.evaluate(items.get(key)) {
                return Err(StorageError::conflict(key));
            }
        }
        items.remove(key);
        Ok(())
    }
}
