//! Domain repositories.
//!
//! Typed operations over the single table. Each repository owns the
//! invariants of its entity; the pipeline stages and external callers go
//! through these instead of composing keys themselves.

mod groups;
mod play_counter;
mod songs;
mod users;
mod votes;

pub use groups::{generate_code, CodeGenerator, GroupRepository};
pub use play_counter::PlayCounterRepository;
pub use songs::SongRepository;
pub use users::UserRepository;
pub use votes::{VoteRepository, MAX_RANK, MIN_RANK};

use crate::storage::StorageError;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Errors raised by repositories.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("User {user_id} already holds {limit} votes")]
    VoteLimit { user_id: String, limit: usize },

    #[error("User {user_id} already belongs to {limit} groups")]
    GroupLimit { user_id: String, limit: usize },

    #[error("No unused group code after {attempts} attempts")]
    CodeExhausted { attempts: usize },

    #[error("User {user_id} is not a member of group {group_id}")]
    NotMember { group_id: String, user_id: String },

    #[error("User {user_id} does not own group {group_id}")]
    NotOwner { group_id: String, user_id: String },

    #[error("Group {0} not found")]
    GroupMissing(String),

    #[error("No group uses code {0}")]
    UnknownCode(String),

    #[error("Song {0} not found")]
    SongMissing(String),

    #[error("Rank {0} is outside {MIN_RANK}..={MAX_RANK}")]
    InvalidRank(u8),
}

impl RepositoryError {
    /// True for conditional-write failures surfaced from storage.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Storage(e) if e.is_conflict())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Storage(e) if e.is_transient())
    }
}
