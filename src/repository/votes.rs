//! Vote repository.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::model::{attr, Entity, Vote};
use crate::storage::{keys, query_all, Condition, Key, Query, Store, Update};

use super::{RepositoryError, Result};

pub const MIN_RANK: u8 = 1;
pub const MAX_RANK: u8 = 10;

/// Repository for user predictions.
pub struct VoteRepository {
    store: Arc<dyn Store>,
    max_votes: usize,
}

impl VoteRepository {
    pub fn new(store: Arc<dyn Store>, max_votes: usize) -> Self {
        Self { store, max_votes }
    }

    /// Cast or re-rank a vote.
    ///
    /// The song must exist. A new vote is refused once the user holds
    /// `max_votes`; re-voting a song already voted for only updates the rank.
    pub async fn cast(&self, user_id: &str, song_id: &str, rank: u8) -> Result<Vote> {
        if !(MIN_RANK..=MAX_RANK).contains(&rank) {
            return Err(RepositoryError::InvalidRank(rank));
        }
        if self.store.get(&Key::song_profile(song_id)).await?.is_none() {
            return Err(RepositoryError::SongMissing(song_id.to_string()));
        }

        let vote = Vote {
            user_id: user_id.to_string(),
            song_id: song_id.to_string(),
            rank,
            cast_at: Utc::now(),
        };

        if self.store.get(&vote.key()).await?.is_some() {
            return self.rerank(vote).await;
        }

        let held = self.for_user(user_id).await?.len();
        if held >= self.max_votes {
            return Err(RepositoryError::VoteLimit {
                user_id: user_id.to_string(),
                limit: self.max_votes,
            });
        }

        match self
            .store
            .put(vote.to_item()?, Some(Condition::NotExists))
            .await
        {
            Ok(()) => {
                debug!(user_id = %user_id, song_id = %song_id, rank, "Cast vote");
                Ok(vote)
            }
            Err(e) if e.is_conflict() => self.rerank(vote).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a vote. Removing a missing vote is not an error.
    pub async fn retract(&self, user_id: &str, song_id: &str) -> Result<()> {
        self.store
            .delete(&Key::vote(user_id, song_id), None)
            .await?;
        Ok(())
    }

    /// Every vote a user holds.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<Vote>> {
        let items = query_all(
            self.store.as_ref(),
            Query::table(keys::user(user_id)).begins_with(keys::SONG_PREFIX),
        )
        .await?;
        Ok(items
            .iter()
            .map(Vote::from_item)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn rerank(&self, vote: Vote) -> Result<Vote> {
        let update = Update::new()
            .set(attr::RANK, vote.rank)
            .set(attr::CAST_AT, vote.cast_at.to_rfc3339())
            .when(Condition::Exists);
        self.store.update(&vote.key(), update).await?;
        debug!(user_id = %vote.user_id, song_id = %vote.song_id, rank = vote.rank, "Re-ranked vote");
        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Item, MemoryStore};

    async fn store_with_songs(ids: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store
                .put(
                    Item::new(Key::song_profile(id))
                        .with("id", *id)
                        .with("title", "t")
                        .with("artist", "a")
                        .with("createdAt", "2026-01-01T00:00:00Z"),
                    None,
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_cast_requires_song() {
        let votes = VoteRepository::new(store_with_songs(&[]).await, 10);
        let err = votes.cast("u1", "123", 1).await.unwrap_err();
        assert!(matches!(err, RepositoryError::SongMissing(_)));
    }

    #[tokio::test]
    async fn test_rank_bounds() {
        let votes = VoteRepository::new(store_with_songs(&["123"]).await, 10);
        assert!(matches!(
            votes.cast("u1", "123", 0).await.unwrap_err(),
            RepositoryError::InvalidRank(0)
        ));
        assert!(matches!(
            votes.cast("u1", "123", 11).await.unwrap_err(),
            RepositoryError::InvalidRank(11)
        ));
        votes.cast("u1", "123", 10).await.unwrap();
    }

    #[tokio::test]
    async fn test_revote_updates_rank() {
        let votes = VoteRepository::new(store_with_songs(&["123"]).await, 10);
        votes.cast("u1", "123", 3).await.unwrap();
        votes.cast("u1", "123", 1).await.unwrap();

        let held = votes.for_user("u1").await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].rank, 1);
    }

    #[tokio::test]
    async fn test_revote_restamps_cast_time() {
        let store = store_with_songs(&["123"]).await;
        let votes = VoteRepository::new(store.clone(), 10);
        let first = votes.cast("u1", "123", 3).await.unwrap();
        let second = votes.cast("u1", "123", 1).await.unwrap();

        let item = store.get(&Key::vote("u1", "123")).await.unwrap().unwrap();
        assert!(item.get_str(attr::CAST_AT).is_some());
        let held = votes.for_user("u1").await.unwrap();
        assert_eq!(held[0].cast_at, second.cast_at);
        assert!(held[0].cast_at >= first.cast_at);
    }

    #[tokio::test]
    async fn test_vote_limit() {
        let votes = VoteRepository::new(store_with_songs(&["1", "2", "3"]).await, 2);
        votes.cast("u1", "1", 1).await.unwrap();
        votes.cast("u1", "2", 2).await.unwrap();

        let err = votes.cast("u1", "3", 3).await.unwrap_err();
        assert!(matches!(err, RepositoryError::VoteLimit { limit: 2, .. }));

        // re-ranking at the limit is allowed
        votes.cast("u1", "2", 5).await.unwrap();

        votes.retract("u1", "1").await.unwrap();
        votes.cast("u1", "3", 3).await.unwrap();
    }
}
