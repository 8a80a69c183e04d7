//! Point distributor.
//!
//! Two halves around the `score-batch` queue:
//! - `fan_out` splits `(user, points)` entries into provider-sized batches,
//!   sends the batches concurrently and reports exactly the entries that
//!   were not accepted.
//! - `apply` credits each received entry with one atomic `ADD` on the user.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::bus::{BatchEntry, BatchResponse, Delivery, Queue, ScoreEntry, MAX_BATCH_SIZE};
use crate::repository::UserRepository;
use crate::storage::Store;

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Entries accepted by the queue.
    pub sent: usize,
    /// Entries that were not accepted, each exactly once.
    pub failed: Vec<ScoreEntry>,
}

impl DistributionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends score entries to `score-batch` and applies them to users.
pub struct PointDistributor {
    queue: Arc<dyn Queue>,
    users: UserRepository,
    batch_size: usize,
}

impl PointDistributor {
    /// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn Queue>, batch_size: usize) -> Self {
        Self {
            queue,
            users: UserRepository::new(store),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Send every entry, batches in parallel.
    pub async fn fan_out(&self, entries: Vec<ScoreEntry>) -> DistributionReport {
        if entries.is_empty() {
            return DistributionReport::default();
        }

        let sends = entries
            .chunks(self.batch_size)
            .map(|chunk| self.send_chunk(chunk));
        let reports = join_all(sends).await;

        let mut report = DistributionReport::default();
        for chunk_report in reports {
            report.sent += chunk_report.sent;
            report.failed.extend(chunk_report.failed);
        }

        debug!(
            queue = %self.queue.name(),
            sent = report.sent,
            failed = report.failed.len(),
            "Fanned out score entries"
        );
        report
    }

    async fn send_chunk(&self, chunk: &[ScoreEntry]) -> DistributionReport {
        let mut unencodable = Vec::new();
        let mut batch = Vec::with_capacity(chunk.len());
        for (i, entry) in chunk.iter().enumerate() {
            match serde_json::to_string(entry) {
                Ok(body) => batch.push(BatchEntry {
                    id: i.to_string(),
                    body,
                }),
                Err(e) => {
                    error!(user_id = %entry.user_id, error = %e, "Failed to encode score entry");
                    unencodable.push(entry.clone());
                }
            }
        }

        let submitted = batch.len();
        let mut failed = match self.queue.send_batch(batch).await {
            Ok(result) => result
                .failed
                .iter()
                .filter_map(|id| id.parse::<usize>().ok())
                .filter_map(|i| chunk.get(i).cloned())
                .collect(),
            Err(e) => {
                warn!(queue = %self.queue.name(), error = %e, entries = submitted, "Batch send failed");
                chunk
                    .iter()
                    .filter(|entry| !unencodable.contains(entry))
                    .cloned()
                    .collect::<Vec<_>>()
            }
        };
        let sent = submitted - failed.len();
        failed.extend(unencodable);
        DistributionReport { sent, failed }
    }

    /// Credit every received entry, concurrently.
    ///
    /// Only deliveries that hit a transient store failure are reported for
    /// redelivery. Unknown users and malformed bodies are dropped.
    pub async fn apply(&self, deliveries: Vec<Delivery>) -> BatchResponse {
        let results = join_all(deliveries.iter().map(|d| self.apply_one(d))).await;
        BatchResponse {
            failed: results.into_iter().flatten().collect(),
        }
    }

    /// Returns the delivery id when it should be redelivered.
    async fn apply_one(&self, delivery: &Delivery) -> Option<String> {
        let entry: ScoreEntry = match delivery.decode() {
            Ok(entry) => entry,
            Err(e) => {
                error!(id = %delivery.id, error = %e, "Dropping malformed score entry");
                return None;
            }
        };
        if entry.user_id.is_empty() {
            error!(id = %delivery.id, "Dropping score entry without user id");
            return None;
        }

        match self.users.add_points(&entry.user_id, entry.points).await {
            Ok(total) => {
                debug!(
                    user_id = %entry.user_id,
                    song_id = ?entry.song_id,
                    points = entry.points,
                    total,
                    "Credited points"
                );
                None
            }
            Err(e) if e.is_conflict() => {
                warn!(user_id = %entry.user_id, points = entry.points, "User missing, dropping score entry");
                None
            }
            Err(e) => {
                warn!(user_id = %entry.user_id, error = %e, "Failed to credit points, will retry");
                Some(delivery.id.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests;
