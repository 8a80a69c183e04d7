//! Administrative purge of song rows.
//!
//! Deletes every Song (found through the index) and resets the play
//! counter. Stamped positions are never renumbered; the monitor keeps
//! working when the counter is lower than positions already handed out.

use std::sync::Arc;

use tracing::{info, warn};

use super::PipelineError;
use crate::repository::{PlayCounterRepository, SongRepository};
use crate::storage::Store;

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub counter: i64,
}

/// Delete every song and set the play counter to `reset_to`.
pub async fn purge_songs(
    store: Arc<dyn Store>,
    reset_to: i64,
) -> Result<PurgeReport, PipelineError> {
    let songs = SongRepository::new(store.clone());
    let ids = songs.all_ids().await?;

    let mut deleted = 0;
    for id in &ids {
        match songs.delete(id).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!(song_id = %id, error = %e, "Failed to delete song");
                return Err(e.into());
            }
        }
    }

    PlayCounterRepository::new(store).reset(reset_to).await?;

    info!(deleted, counter = reset_to, "Purged songs");
    Ok(PurgeReport {
        deleted,
        counter: reset_to,
    })
}
