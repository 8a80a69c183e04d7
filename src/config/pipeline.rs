//! Pipeline stage configuration: monitor, catalog, scoring, worker.

use serde::Deserialize;

/// Track Monitor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Now-playing feed URL.
    pub feed_url: String,
    /// Minimum requeue delay in seconds.
    pub floor_delay_secs: u64,
    /// Maximum requeue delay in seconds. SQS rejects delays above 900.
    pub max_delay_secs: u64,
    /// HTTP timeout for feed requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            feed_url: "http://localhost:8080/now-playing".to_string(),
            floor_delay_secs: 10,
            max_delay_secs: 900,
            request_timeout_secs: 10,
        }
    }
}

/// Catalog search configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Search endpoint URL.
    pub search_url: String,
    /// Bearer token sent with each search.
    pub token: Option<String>,
    /// Market passed to the search endpoint.
    pub market: Option<String>,
    /// HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_url: "https://api.spotify.com/v1/search".to_string(),
            token: None,
            market: None,
            request_timeout_secs: 10,
        }
    }
}

/// Scoring policy constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Points awarded per unit of play position.
    pub points_per_position: i64,
    /// Upper bound (inclusive) of the deterministic jitter.
    pub jitter_bound: i64,
    /// Page size when resolving voters.
    pub page_size: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            points_per_position: 100,
            jitter_bound: 10,
            page_size: 100,
        }
    }
}

/// Pipeline stage run by a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Monitor,
    Scorer,
    Distributor,
}

/// Worker process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stages this process consumes. Empty runs every stage.
    pub stages: Vec<Stage>,
    /// Send the initial `self-requeue` message on startup.
    pub kick_off: bool,
}

impl WorkerConfig {
    pub fn runs(&self, stage: Stage) -> bool {
        self.stages.is_empty() || self.stages.contains(&stage)
    }
}
