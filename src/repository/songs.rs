//! Song repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{attr, voter_id, Entity, Song};
use crate::storage::{keys, query_all, Condition, Key, Query, Store, Update};

use super::Result;

/// Page size for index lookups.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Repository for songs and their voters.
pub struct SongRepository {
    store: Arc<dyn Store>,
    page_size: usize,
}

impl SongRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_page_size(store, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: Arc<dyn Store>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Song>> {
        match self.store.get(&Key::song_profile(id)).await? {
            Some(item) => Ok(Some(Song::from_item(&item)?)),
            None => Ok(None),
        }
    }

    /// Create the song row if it does not exist yet.
    ///
    /// Returns `true` when this call created it. Losing a creation race to a
    /// concurrent writer is not an error.
    pub async fn ensure(&self, song: &Song) -> Result<bool> {
        if self.store.get(&song.key()).await?.is_some() {
            return Ok(false);
        }
        match self
            .store
            .put(song.to_item()?, Some(Condition::NotExists))
            .await
        {
            Ok(()) => {
                debug!(song_id = %song.id, "Created song");
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stamp `playedAt`/`playedPosition` on a song that has not been played.
    ///
    /// Returns `false` when the song was already stamped (or is missing).
    pub async fn stamp_played(
        &self,
        id: &str,
        position: i64,
        played_at: DateTime<Utc>,
    ) -> Result<bool> {
        let update = Update::new()
            .set(attr::PLAYED_AT, played_at.to_rfc3339())
            .set(attr::PLAYED_POSITION, position)
            .when(Condition::Exists.and(Condition::attribute_not_exists(attr::PLAYED_POSITION)));

        match self.store.update(&Key::song_profile(id), update).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every user holding a vote for the song.
    pub async fn voters(&self, song_id: &str) -> Result<Vec<String>> {
        let items = query_all(
            self.store.as_ref(),
            Query::index(keys::song(song_id))
                .begins_with(keys::USER_PREFIX)
                .limit(self.page_size),
        )
        .await?;
        Ok(items
            .iter()
            .filter_map(voter_id)
            .map(str::to_string)
            .collect())
    }

    /// Ids of every stored song, located through the index.
    pub async fn all_ids(&self) -> Result<Vec<String>> {
        let items = query_all(
            self.store.as_ref(),
            Query::index(keys::PROFILE)
                .begins_with(keys::SONG_PREFIX)
                .limit(self.page_size),
        )
        .await?;
        Ok(items
            .iter()
            .filter_map(|item| keys::strip(&item.key.pk, keys::SONG_PREFIX))
            .map(str::to_string)
            .collect())
    }

    /// Delete one song row.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&Key::song_profile(id), None).await?;
        Ok(())
    }
}
