//! Test utilities and mock implementations.
//!
//! Mock feed and catalog for driving the pipeline without HTTP, plus small
//! builders shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::ExponentialBuilder;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::catalog::{Catalog, CatalogError, CatalogTrack, Result as CatalogResult};
use crate::feed::{AiringTrack, FeedError, NowPlaying, NowPlayingFeed, Result as FeedResult};

/// Backoff that retries twice with millisecond delays.
pub fn fast_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(1))
        .with_max_times(2)
}

/// Catalog track with an album and no artwork.
pub fn catalog_track(id: &str, title: &str, artist: &str) -> CatalogTrack {
    CatalogTrack {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: "Test Album".to_string(),
        artwork_url: None,
    }
}

/// Mock feed with a scripted airing track.
///
/// `next_updated` is reported relative to the `now` passed in by the caller.
pub struct MockFeed {
    airing: RwLock<Option<AiringTrack>>,
    next_update_in: RwLock<Option<chrono::Duration>>,
    fail: RwLock<bool>,
    polls: AtomicUsize,
}

impl Default for MockFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFeed {
    /// Nothing airing, next update in 30 seconds.
    pub fn new() -> Self {
        Self {
            airing: RwLock::new(None),
            next_update_in: RwLock::new(Some(chrono::Duration::seconds(30))),
            fail: RwLock::new(false),
            polls: AtomicUsize::new(0),
        }
    }

    pub async fn set_airing(&self, title: &str, artist: &str) {
        *self.airing.write().await = Some(AiringTrack {
            id: None,
            title: title.to_string(),
            artist: artist.to_string(),
            release: None,
            played: None,
        });
    }

    pub async fn set_nothing_airing(&self) {
        *self.airing.write().await = None;
    }

    /// Offset of `next_updated` from now. `None` omits it, which reads as now.
    pub async fn set_next_update_in(&self, offset: Option<chrono::Duration>) {
        *self.next_update_in.write().await = offset;
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NowPlayingFeed for MockFeed {
    async fn now_playing(&self, now: DateTime<Utc>) -> FeedResult<NowPlaying> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.read().await {
            return Err(FeedError::Transport("Mock feed failure".to_string()));
        }
        let next_updated = self
            .next_update_in
            .read()
            .await
            .map_or(now, |offset| now + offset);
        Ok(NowPlaying {
            track: self.airing.read().await.clone(),
            next_updated,
        })
    }
}

/// Mock catalog keyed by `(title, artist)`.
#[derive(Default)]
pub struct MockCatalog {
    tracks: RwLock<HashMap<(String, String), CatalogTrack>>,
    fail: RwLock<bool>,
    searches: AtomicUsize,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_track(&self, id: &str, title: &str, artist: &str) {
        self.tracks.write().await.insert(
            (title.to_string(), artist.to_string()),
            catalog_track(id, title, artist),
        );
    }

    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn search(&self, title: &str, artist: &str) -> CatalogResult<Option<CatalogTrack>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if *self.fail.read().await {
            return Err(CatalogError::Status(503));
        }
        Ok(self
            .tracks
            .read()
            .await
            .get(&(title.to_string(), artist.to_string()))
            .cloned())
    }
}
