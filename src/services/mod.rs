//! Pipeline stages.
//!
//! - `monitor`: polls the feed, detects transitions, self-requeues
//! - `scorer`: resolves voters and points for a played song
//! - `distributor`: fans score entries out in batches and applies them
//! - `purge`: administrative reset of song rows and the play counter
//!
//! Stages are stateless. Every failure ends in a re-enqueue, a logged drop
//! or a partial-success report; none of them ends the process.

pub mod distributor;
pub mod monitor;
pub mod purge;
pub mod scorer;

pub use distributor::{DistributionReport, PointDistributor};
pub use monitor::{requeue_delay, MonitorOutcome, TrackMonitor, Transition};
pub use purge::{purge_songs, PurgeReport};
pub use scorer::{ScoreReport, Scorer, ScoringPolicy, ScoringResult};

use crate::bus::BusError;
use crate::catalog::CatalogError;
use crate::feed::FeedError;
use crate::repository::RepositoryError;
use crate::storage::StorageError;

/// Errors surfaced by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network or throughput failure. Retried through redelivery or the next poll.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Missing song, user or vote. Logged and treated as empty.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The input cannot be processed as is. Logged and dropped.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Conditional write lost. Treated as a no-op.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl PipelineError {
    /// True when redelivering the input may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => PipelineError::NotFound(e.to_string()),
            StorageError::Conflict { .. } => PipelineError::Conflict(e.to_string()),
            StorageError::Transient(_) => PipelineError::Transient(e.to_string()),
            StorageError::Malformed(_) => PipelineError::Precondition(e.to_string()),
        }
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Storage(inner) => inner.into(),
            RepositoryError::SongMissing(_) | RepositoryError::GroupMissing(_) => {
                PipelineError::NotFound(e.to_string())
            }
            other => PipelineError::Precondition(other.to_string()),
        }
    }
}

impl From<BusError> for PipelineError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Decode(_) | BusError::BatchTooLarge(_) => {
                PipelineError::Precondition(e.to_string())
            }
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<FeedError> for PipelineError {
    fn from(e: FeedError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}
