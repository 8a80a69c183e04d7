//! Domain limits for votes, groups, codes and batches.
//!
//! | Limit          | Default | Notes                                  |
//! |----------------|---------|----------------------------------------|
//! | max_votes      | 10      | Votes per user                         |
//! | max_groups     | 5       | Groups a user may belong to            |
//! | code_length    | 6       | Characters in a group join code        |
//! | code_attempts  | 5       | Tries before giving up on a free code  |
//! | batch_size     | 10      | Entries per score batch (SQS maximum)  |

use serde::Deserialize;

use crate::bus::MAX_BATCH_SIZE;

pub const DEFAULT_MAX_VOTES: usize = 10;
pub const DEFAULT_MAX_GROUPS: usize = 5;
pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_CODE_ATTEMPTS: usize = 5;

/// Domain limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum votes a user may hold.
    pub max_votes: usize,
    /// Maximum groups a user may belong to.
    pub max_groups: usize,
    /// Length of generated group codes.
    pub code_length: usize,
    /// Attempts to find an unused group code.
    pub code_attempts: usize,
    /// Entries per score batch. Clamped to 10.
    pub batch_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_votes: DEFAULT_MAX_VOTES,
            max_groups: DEFAULT_MAX_GROUPS,
            code_length: DEFAULT_CODE_LENGTH,
            code_attempts: DEFAULT_CODE_ATTEMPTS,
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl Limits {
    /// Batch size within `1..=MAX_BATCH_SIZE`.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}
