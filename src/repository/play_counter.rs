//! Global play counter.

use std::sync::Arc;

use crate::model::{attr, Entity, PlayCounter};
use crate::storage::{Key, StorageError, Store, Update};

use super::Result;

/// Repository for the single `PLAYCOUNT`/`CURRENT` row.
///
/// Only the monitor advances the counter and only the purge resets it.
pub struct PlayCounterRepository {
    store: Arc<dyn Store>,
}

impl PlayCounterRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current value, `0` before the first play.
    pub async fn current(&self) -> Result<i64> {
        match self.store.get(&Key::play_counter()).await? {
            Some(item) => Ok(PlayCounter::from_item(&item)?.value),
            None => Ok(0),
        }
    }

    /// Atomically increment and return the new value.
    pub async fn next_position(&self) -> Result<i64> {
        let item = self
            .store
            .update(&Key::play_counter(), Update::new().add(attr::VALUE, 1))
            .await?;
        item.get_i64(attr::VALUE).ok_or_else(|| {
            StorageError::Malformed("play counter has no numeric value".to_string()).into()
        })
    }

    /// Overwrite the counter.
    pub async fn reset(&self, value: i64) -> Result<()> {
        self.store
            .put(PlayCounter { value }.to_item()?, None)
            .await?;
        Ok(())
    }
}
