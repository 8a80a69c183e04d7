//! Track Monitor.
//!
//! A self-rescheduling poller. Its only state is the `self-requeue` message
//! body: the song id seen on the previous poll, or `null` when idle. Every
//! invocation ends by sending the next state back to `self-requeue` with a
//! delay derived from the feed's `next_updated`.
//!
//! When the resolved track differs from the previous one the song is
//! created if missing, stamped with the next play position and, if this
//! invocation did the stamping, announced on `scoring-trigger`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::PipelineError;
use crate::bus::{send_json, Queue, Queues, RequeueMessage, ScoringTrigger};
use crate::catalog::{Catalog, CatalogTrack};
use crate::config::MonitorConfig;
use crate::feed::NowPlayingFeed;
use crate::model::Song;
use crate::repository::{PlayCounterRepository, RepositoryError, SongRepository};
use crate::storage::Store;
use crate::utils::retry::{queue_backoff, store_backoff};

/// Delay until the next poll: time to `next_updated`, at least `floor`, at
/// most `max`.
pub fn requeue_delay(
    next_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    floor: Duration,
    max: Duration,
) -> Duration {
    let until = (next_updated - now).to_std().unwrap_or(Duration::ZERO);
    until.max(floor).min(max)
}

/// What a poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Feed unreachable or malformed.
    FeedUnavailable,
    /// Nothing on air.
    Idle,
    /// On air, but the catalog had no match or could not be reached.
    Unresolved,
    /// Same track as the previous poll.
    Unchanged,
    /// A new track. `position` is set when this poll stamped the song.
    Started {
        song_id: String,
        position: Option<i64>,
    },
    /// A new track, but recording it failed. The next poll retries.
    StoreFailed { song_id: String },
}

/// Result of one poll: the next state and when to run again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub next: RequeueMessage,
    pub delay: Duration,
    pub transition: Transition,
}

/// Polls the feed and records track transitions.
pub struct TrackMonitor {
    feed: Arc<dyn NowPlayingFeed>,
    catalog: Arc<dyn Catalog>,
    songs: SongRepository,
    counter: PlayCounterRepository,
    requeue: Arc<dyn Queue>,
    scoring: Arc<dyn Queue>,
    floor: Duration,
    max_delay: Duration,
    backoff: ExponentialBuilder,
    store_backoff: ExponentialBuilder,
}

impl TrackMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn NowPlayingFeed>,
        catalog: Arc<dyn Catalog>,
        queues: &Queues,
        config: &MonitorConfig,
    ) -> Self {
        let max_delay = Duration::from_secs(config.max_delay_secs).min(crate::bus::MAX_DELAY);
        Self {
            feed,
            catalog,
            songs: SongRepository::new(store.clone()),
            counter: PlayCounterRepository::new(store),
            requeue: queues.requeue.clone(),
            scoring: queues.scoring.clone(),
            floor: Duration::from_secs(config.floor_delay_secs).min(max_delay),
            max_delay,
            backoff: queue_backoff(),
            store_backoff: store_backoff(),
        }
    }

    /// Override the backoff used for queue sends and store retries.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self.store_backoff = backoff;
        self
    }

    /// Run one poll and send the next state to `self-requeue`.
    ///
    /// Fails only when the self-requeue cannot be sent, so the provider
    /// redelivers the current message and the loop survives.
    #[tracing::instrument(name = "monitor.poll", skip_all, fields(prev = ?prev.song_id))]
    pub async fn handle(
        &self,
        prev: RequeueMessage,
        now: DateTime<Utc>,
    ) -> Result<MonitorOutcome, PipelineError> {
        let outcome = self.step(prev, now).await;
        self.send(self.requeue.as_ref(), &outcome.next, outcome.delay)
            .await?;
        debug!(next = ?outcome.next.song_id, delay = ?outcome.delay, "Requeued monitor");
        Ok(outcome)
    }

    /// Run one poll without requeueing.
    pub async fn step(&self, prev: RequeueMessage, now: DateTime<Utc>) -> MonitorOutcome {
        let prev_id = prev.song_id;
        let stay = |transition: Transition, next_updated: DateTime<Utc>| MonitorOutcome {
            next: RequeueMessage {
                song_id: prev_id.clone(),
            },
            delay: self.delay(next_updated, now),
            transition,
        };

        let now_playing = match self.feed.now_playing(now).await {
            Ok(now_playing) => now_playing,
            Err(e) => {
                warn!(error = %e, "Feed unavailable");
                return stay(Transition::FeedUnavailable, now);
            }
        };
        let next_updated = now_playing.next_updated;

        let Some(airing) = now_playing.track else {
            debug!("Nothing airing");
            return stay(Transition::Idle, next_updated);
        };

        let track = match self.catalog.search(&airing.title, &airing.artist).await {
            Ok(Some(track)) => track,
            Ok(None) => {
                info!(title = %airing.title, artist = %airing.artist, "Track not in catalog");
                return stay(Transition::Unresolved, next_updated);
            }
            Err(e) => {
                warn!(title = %airing.title, artist = %airing.artist, error = %e, "Catalog search failed");
                return stay(Transition::Unresolved, next_updated);
            }
        };

        if prev_id.as_deref() == Some(track.id.as_str()) {
            return stay(Transition::Unchanged, next_updated);
        }

        let position = match self.mark_played(&track, now).await {
            Ok(position) => position,
            Err(e) => {
                error!(song_id = %track.id, error = %e, "Failed to record transition");
                return stay(
                    Transition::StoreFailed {
                        song_id: track.id.clone(),
                    },
                    next_updated,
                );
            }
        };

        if let Some(position) = position {
            info!(song_id = %track.id, position, title = %track.title, "Song played");
            let trigger = ScoringTrigger {
                song_id: track.id.clone(),
            };
            if let Err(e) = self
                .send(self.scoring.as_ref(), &trigger, Duration::ZERO)
                .await
            {
                error!(song_id = %track.id, error = %e, "Failed to send scoring trigger");
            }
        } else {
            debug!(song_id = %track.id, "Song already played");
        }

        MonitorOutcome {
            next: RequeueMessage::tracking(track.id.clone()),
            delay: self.delay(next_updated, now),
            transition: Transition::Started {
                song_id: track.id,
                position,
            },
        }
    }

    /// Create the song if missing and stamp it with the next play position.
    ///
    /// Returns the stamped position, or `None` when the song was already
    /// played (by an earlier poll or a concurrent one).
    async fn mark_played(
        &self,
        track: &CatalogTrack,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, PipelineError> {
        let song = Song {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            artwork_url: track.artwork_url.clone(),
            played_at: None,
            played_position: None,
            created_at: now,
        };
        let songs = &self.songs;
        let song = &song;
        self.retry_store("ensure song", move || async move { songs.ensure(song).await })
            .await?;

        let stored = self
            .retry_store("get song", move || async move { songs.get(&song.id).await })
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("song {}", song.id)))?;
        if stored.is_played() {
            return Ok(None);
        }

        // Not retried; a repeated ADD skips a position.
        let position = self.counter.next_position().await?;
        let stamped = self
            .retry_store("stamp song", move || async move {
                songs.stamp_played(&song.id, position, now).await
            })
            .await?;
        if stamped {
            return Ok(Some(position));
        }

        // A retried stamp can conflict with its own earlier write.
        let current = self
            .retry_store("get song", move || async move { songs.get(&song.id).await })
            .await?;
        if current.and_then(|s| s.played_position) == Some(position) {
            return Ok(Some(position));
        }
        warn!(song_id = %song.id, position, "Lost stamping race, position unused");
        Ok(None)
    }

    /// Retry an idempotent store call while it fails transiently.
    async fn retry_store<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        call.retry(self.store_backoff)
            .when(RepositoryError::is_transient)
            .notify(|err: &RepositoryError, dur: Duration| {
                warn!(op, error = %err, delay = ?dur, "Store call failed, retrying");
            })
            .await
    }

    fn delay(&self, next_updated: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        requeue_delay(next_updated, now, self.floor, self.max_delay)
    }

    async fn send<T: Serialize + Sync>(
        &self,
        queue: &dyn Queue,
        message: &T,
        delay: Duration,
    ) -> Result<(), PipelineError> {
        (move || async move { send_json(queue, message, delay).await })
            .retry(self.backoff)
            .notify(|err: &crate::bus::BusError, dur: Duration| {
                warn!(queue = %queue.name(), error = %err, delay = ?dur, "Send failed, retrying");
            })
            .await
            .map_err(PipelineError::from)
    }
}
