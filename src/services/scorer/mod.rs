//! Voter resolver and scorer.
//!
//! Turns a played song id into one point value and the set of users who
//! voted for it, then hands the `(user, points)` entries to the distributor.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::distributor::PointDistributor;
use super::PipelineError;
use crate::bus::ScoreEntry;
use crate::config::ScoringConfig;
use crate::model::Song;
use crate::repository::SongRepository;
use crate::storage::Store;
use crate::utils::retry::queue_backoff;

/// Points awarded for a played song.
///
/// `points = playedPosition * points_per_position + jitter`, where the
/// jitter lies in `0..=jitter_bound` and is derived from a SHA-256 digest of
/// the song id and position. The result depends on nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub points_per_position: i64,
    pub jitter_bound: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from_config(&ScoringConfig::default())
    }
}

impl ScoringPolicy {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            points_per_position: config.points_per_position,
            jitter_bound: config.jitter_bound.max(0),
        }
    }

    pub fn jitter(&self, song_id: &str, position: i64) -> i64 {
        if self.jitter_bound <= 0 {
            return 0;
        }
        let mut hasher = Sha256::new();
        hasher.update(song_id.as_bytes());
        hasher.update(b":");
        hasher.update(position.to_string().as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let span = self.jitter_bound as u64 + 1;
        (u64::from_be_bytes(prefix) % span) as i64
    }

    pub fn points_at(&self, song_id: &str, position: i64) -> i64 {
        position
            .saturating_mul(self.points_per_position)
            .saturating_add(self.jitter(song_id, position))
    }

    /// Points for a played song. Unplayed songs are a precondition failure.
    pub fn points_for(&self, song: &Song) -> Result<i64, PipelineError> {
        let position = song.played_position.ok_or_else(|| {
            PipelineError::Precondition(format!("song {} has no playedPosition", song.id))
        })?;
        Ok(self.points_at(&song.id, position))
    }
}

/// Voters and points resolved for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringResult {
    pub song_id: String,
    pub points: i64,
    pub voters: Vec<String>,
}

impl ScoringResult {
    pub fn entries(&self) -> Vec<ScoreEntry> {
        self.voters
            .iter()
            .map(|user_id| ScoreEntry {
                user_id: user_id.clone(),
                points: self.points,
                song_id: Some(self.song_id.clone()),
            })
            .collect()
    }
}

/// Outcome of scoring one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreReport {
    pub song_id: String,
    pub points: i64,
    pub voters: usize,
    /// Entries still undelivered after retrying.
    pub failed: Vec<ScoreEntry>,
}

/// Resolves voters for played songs and fans their points out.
pub struct Scorer {
    songs: SongRepository,
    policy: ScoringPolicy,
    distributor: Arc<PointDistributor>,
    backoff: ExponentialBuilder,
}

impl Scorer {
    pub fn new(
        store: Arc<dyn Store>,
        distributor: Arc<PointDistributor>,
        config: &ScoringConfig,
    ) -> Self {
        Self {
            songs: SongRepository::with_page_size(store, config.page_size),
            policy: ScoringPolicy::from_config(config),
            distributor,
            backoff: queue_backoff(),
        }
    }

    /// Override the backoff used when re-sending failed entries.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// Look up the song, compute its points and list its voters.
    pub async fn resolve(&self, song_id: &str) -> Result<ScoringResult, PipelineError> {
        let song = self
            .songs
            .get(song_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("song {}", song_id)))?;
        let points = self.policy.points_for(&song)?;
        let voters = self.songs.voters(song_id).await?;

        debug!(song_id = %song_id, points, voters = voters.len(), "Resolved voters");
        Ok(ScoringResult {
            song_id: song_id.to_string(),
            points,
            voters,
        })
    }

    /// Resolve and distribute. Zero voters is a valid, empty outcome.
    #[tracing::instrument(name = "scorer.score", skip_all, fields(song_id = %song_id))]
    pub async fn score(&self, song_id: &str) -> Result<ScoreReport, PipelineError> {
        let result = self.resolve(song_id).await?;
        if result.voters.is_empty() {
            info!(song_id = %song_id, "Song has no voters");
            return Ok(ScoreReport {
                song_id: result.song_id,
                points: result.points,
                voters: 0,
                failed: Vec::new(),
            });
        }

        let failed = self.distribute(result.entries()).await;
        for entry in &failed {
            error!(
                song_id = %song_id,
                user_id = %entry.user_id,
                points = entry.points,
                "Score entry could not be delivered"
            );
        }

        info!(
            song_id = %song_id,
            points = result.points,
            voters = result.voters.len(),
            failed = failed.len(),
            "Scored song"
        );
        Ok(ScoreReport {
            song_id: result.song_id,
            points: result.points,
            voters: result.voters.len(),
            failed,
        })
    }

    /// Fan out, re-sending only the entries that failed. Returns what is left.
    async fn distribute(&self, entries: Vec<ScoreEntry>) -> Vec<ScoreEntry> {
        let pending = Mutex::new(entries);
        let remaining = &pending;
        let distributor = self.distributor.as_ref();

        let outcome = (move || async move {
            let batch = remaining.lock().await.clone();
            let report = distributor.fan_out(batch).await;
            let failed = report.failed.len();
            *remaining.lock().await = report.failed;
            if failed == 0 {
                Ok(())
            } else {
                Err(failed)
            }
        })
        .retry(self.backoff)
        .notify(|failed: &usize, dur: Duration| {
            warn!(failed = *failed, delay = ?dur, "Score entries not accepted, retrying");
        })
        .await;

        // Leftover entries stay in `pending` for the caller to report.
        if let Err(failed) = outcome {
            warn!(failed, "Giving up on score entries after retries");
        }
        pending.into_inner()
    }
}
