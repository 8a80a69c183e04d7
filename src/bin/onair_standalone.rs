//! onair-standalone: the whole pipeline in one process
//!
//! Runs the monitor, scorer and distributor against the configured store
//! and queues, and seeds the monitor loop on startup.
//!
//! ## Architecture
//! ```text
//! onair-standalone (single process)
//!     ├── MemoryStore (or DynamoDB)
//!     ├── channel queues: self-requeue, scoring-trigger, score-batch
//!     ├── monitor      ──HTTP──→ now-playing feed, catalog search
//!     ├── scorer
//!     └── distributor
//! ```
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: memory
//! messaging:
//!   type: channel
//! monitor:
//!   feed_url: https://station.example/now-playing
//! catalog:
//!   token: "..."
//! ```

use tracing::{error, info};

use onair::config::{Config, WorkerConfig};
use onair::utils::bootstrap::{init_tracing, parse_config_path};
use onair::Pipeline;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        storage = ?config.storage.storage_type,
        messaging = ?config.messaging.messaging_type,
        feed = %config.monitor.feed_url,
        "onair-standalone starting"
    );

    let pipeline = Pipeline::from_config(&config).await?;
    let worker = WorkerConfig {
        stages: Vec::new(),
        kick_off: true,
    };
    pipeline.run(&worker).await
}
