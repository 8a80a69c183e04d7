//! Single-table storage.
//!
//! Every entity lives in one keyspace addressed by a composite `(pk, sk)`
//! pair. A single global secondary index keyed on `(gsi_pk, gsi_sk)` serves
//! every reverse lookup; by default an item's index key is its inverted
//! primary key. There is no scan operation.
//!
//! Implementations:
//! - `MemoryStore`: in-process table for standalone mode and tests
//! - `DynamoStore`: DynamoDB table (feature `dynamo`)

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{StorageConfig, StorageType};

pub mod expression;
pub mod keys;
pub mod memory;

#[cfg(feature = "dynamo")]
pub mod dynamo;

pub use expression::{Condition, Update};
pub use memory::MemoryStore;

#[cfg(feature = "dynamo")]
pub use dynamo::DynamoStore;

/// Attribute map of a stored item (everything except the key columns).
pub type Attributes = serde_json::Map<String, Value>;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Item not found: pk={pk}, sk={sk}")]
    NotFound { pk: String, sk: String },

    #[error("Condition failed: pk={pk}, sk={sk}")]
    Conflict { pk: String, sk: String },

    #[error("Storage provider error: {0}")]
    Transient(String),

    #[error("Malformed item: {0}")]
    Malformed(String),
}

impl StorageError {
    pub(crate) fn not_found(key: &Key) -> Self {
        StorageError::NotFound {
            pk: key.pk.clone(),
            sk: key.sk.clone(),
        }
    }

    pub(crate) fn conflict(key: &Key) -> Self {
        StorageError::Conflict {
            pk: key.pk.clone(),
            sk: key.sk.clone(),
        }
    }

    /// True for conditional-write failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }

    /// True for provider errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Composite key: partition key plus sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// The same pair with partition and sort swapped.
    pub fn inverted(&self) -> Self {
        Self {
            pk: self.sk.clone(),
            sk: self.pk.clone(),
        }
    }
}

/// A stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: Key,
    /// Index key. `None` keeps the item out of the index.
    pub index_key: Option<Key>,
    pub attributes: Attributes,
}

impl Item {
    /// Create an item indexed under its inverted key.
    pub fn new(key: Key) -> Self {
        let index_key = Some(key.inverted());
        Self {
            key,
            index_key,
            attributes: Attributes::new(),
        }
    }

    /// Create an item that does not appear in the index.
    pub fn unindexed(key: Key) -> Self {
        Self {
            key,
            index_key: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_index_key(mut self, index_key: Key) -> Self {
        self.index_key = Some(index_key);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(Value::as_i64)
    }
}

/// Sort-key predicate for a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortKeyCondition {
    #[default]
    Any,
    Exact(String),
    BeginsWith(String),
}

impl SortKeyCondition {
    pub fn matches(&self, sort_key: &str) -> bool {
        match self {
            SortKeyCondition::Any => true,
            SortKeyCondition::Exact(sk) => sort_key == sk,
            SortKeyCondition::BeginsWith(prefix) => sort_key.starts_with(prefix.as_str()),
        }
    }
}

/// Which key pair a query addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryTarget {
    #[default]
    Table,
    Index,
}

/// Position to resume a paged query from.
///
/// Holds the primary and index keys of the last item returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub key: Key,
    pub index_key: Option<Key>,
}

/// A single-partition query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub target: QueryTarget,
    pub partition: String,
    pub sort: SortKeyCondition,
    /// Page size hint. Backends may return fewer items.
    pub limit: Option<usize>,
    pub start: Option<Cursor>,
}

impl Query {
    /// Query the base table by partition key.
    pub fn table(partition: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Table,
            partition: partition.into(),
            sort: SortKeyCondition::Any,
            limit: None,
            start: None,
        }
    }

    /// Query the secondary index by index partition key.
    pub fn index(partition: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Index,
            ..Self::table(partition)
        }
    }

    pub fn exact(mut self, sort_key: impl Into<String>) -> Self {
        self.sort = SortKeyCondition::Exact(sort_key.into());
        self
    }

    pub fn begins_with(mut self, prefix: impl Into<String>) -> Self {
        self.sort = SortKeyCondition::BeginsWith(prefix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn starting_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start = cursor;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Present when more results may follow.
    pub next: Option<Cursor>,
}

/// Interface for the single-table store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Write a whole item, replacing any existing one.
    ///
    /// A failed condition returns `StorageError::Conflict`.
    async fn put(&self, item: Item, condition: Option<Condition>) -> Result<()>;

    /// Read one item by primary key.
    async fn get(&self, key: &Key) -> Result<Option<Item>>;

    /// Read one page of a partition, from the table or the index.
    async fn query(&self, query: Query) -> Result<Page>;

    /// Apply `SET`/`ADD` assignments and return the item's new values.
    ///
    /// `ADD` is atomic and needs no prior read. Updating a missing item
    /// creates it (unindexed) unless the condition forbids it.
    async fn update(&self, key: &Key, update: Update) -> Result<Item>;

    /// Delete one item. Deleting a missing item without a condition is not an error.
    async fn delete(&self, key: &Key, condition: Option<Condition>) -> Result<()>;
}

/// Run a query to exhaustion, following cursors page by page.
pub async fn query_all(store: &dyn Store, query: Query) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut next = query.start.clone();
    loop {
        let page = store.query(query.clone().starting_after(next)).await?;
        items.extend(page.items);
        match page.next {
            Some(cursor) => next = Some(cursor),
            None => return Ok(items),
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    info!(storage_type = ?config.storage_type, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStore::with_page_size(config.page_size))),
        #[cfg(feature = "dynamo")]
        StorageType::Dynamo => {
            let store = DynamoStore::new(&config.dynamo).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "dynamo"))]
        StorageType::Dynamo => {
            tracing::error!("DynamoDB storage requested but 'dynamo' feature is not enabled");
            Err("dynamo feature not enabled".into())
        }
    }
}
