//! onair-worker: one or more pipeline stages against shared queues
//!
//! Consumes the queues of the stages listed in `worker.stages` (all stages
//! when empty). Set `worker.kick_off: true` on exactly one deployment to
//! seed the monitor loop.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: dynamo
//! messaging:
//!   type: sqs
//! worker:
//!   stages: [scorer, distributor]
//! ```
//!
//! Environment overrides use the `ONAIR` prefix and `__` separator, e.g.
//! `ONAIR_MESSAGING__SQS__REGION=eu-west-1`.

use tracing::{error, info};

use onair::config::Config;
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
        stages = ?config.worker.stages,
        kick_off = config.worker.kick_off,
        "onair-worker starting"
    );

    let pipeline = Pipeline::from_config(&config).await?;
    pipeline.run(&config.worker).await
}
