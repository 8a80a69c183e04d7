//! Storage configuration types.

use serde::Deserialize;

use crate::storage::memory::DEFAULT_PAGE_SIZE;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// In-process table (standalone mode, tests).
    #[default]
    Memory,
    /// DynamoDB single table.
    Dynamo,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Items per page for the in-memory backend.
    pub page_size: usize,
    /// DynamoDB-specific configuration.
    pub dynamo: DynamoConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            page_size: DEFAULT_PAGE_SIZE,
            dynamo: DynamoConfig::default(),
        }
    }
}

/// DynamoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Table holding every entity.
    pub table_name: String,
    /// Secondary index keyed on `gsi_pk` / `gsi_sk`.
    pub index_name: String,
    /// Endpoint override (DynamoDB Local, LocalStack).
    pub endpoint_url: Option<String>,
    /// Region override. Falls back to the default provider chain.
    pub region: Option<String>,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            table_name: "onair".to_string(),
            index_name: "gsi".to_string(),
            endpoint_url: None,
            region: None,
        }
    }
}
